use std::{fmt, str::FromStr};

/// Image format each decoded frame is encoded into before publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EncodingFormat {
    #[default]
    Png,
    Jpeg,
    Tiff,
    WebP,
    Bitmap,
    Jpeg2000,
    Pbm,
    Raster,
}

impl EncodingFormat {
    pub const ALL: [EncodingFormat; 8] = [
        EncodingFormat::Png,
        EncodingFormat::Jpeg,
        EncodingFormat::Tiff,
        EncodingFormat::WebP,
        EncodingFormat::Bitmap,
        EncodingFormat::Jpeg2000,
        EncodingFormat::Pbm,
        EncodingFormat::Raster,
    ];

    /// Canonical file extension, without the leading dot.
    pub fn extension(&self) -> &'static str {
        match self {
            EncodingFormat::Png => "png",
            EncodingFormat::Jpeg => "jpg",
            EncodingFormat::Tiff => "tif",
            EncodingFormat::WebP => "webp",
            EncodingFormat::Bitmap => "bmp",
            EncodingFormat::Jpeg2000 => "jp2",
            EncodingFormat::Pbm => "pbm",
            EncodingFormat::Raster => "ras",
        }
    }
}

impl fmt::Display for EncodingFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for EncodingFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_start_matches('.').to_lowercase().as_str() {
            "png" => Ok(EncodingFormat::Png),
            "jpg" | "jpeg" => Ok(EncodingFormat::Jpeg),
            "tif" | "tiff" => Ok(EncodingFormat::Tiff),
            "webp" => Ok(EncodingFormat::WebP),
            "bmp" | "bitmap" => Ok(EncodingFormat::Bitmap),
            "jp2" | "jpeg2000" => Ok(EncodingFormat::Jpeg2000),
            "pbm" => Ok(EncodingFormat::Pbm),
            "ras" | "raster" => Ok(EncodingFormat::Raster),
            other => Err(format!("unknown encoding format: {other}")),
        }
    }
}

/// Encoder tuning knobs. Each encoder reads the keys it understands and
/// ignores the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncodingParamKey {
    /// 0-100
    JpegQuality,
    /// 0 (fastest) - 9 (smallest)
    PngCompression,
    /// Luma level below which a PBM pixel is black
    PbmThreshold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodingParam {
    pub key: EncodingParamKey,
    pub value: i32,
}

impl EncodingParam {
    pub fn new(key: EncodingParamKey, value: i32) -> Self {
        Self { key, value }
    }
}

/// Output format plus ordered encoder parameters. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncoderConfig {
    format: EncodingFormat,
    params: Vec<EncodingParam>,
}

impl EncoderConfig {
    pub fn new(format: EncodingFormat) -> Self {
        Self {
            format,
            params: Vec::new(),
        }
    }

    pub fn with_params(format: EncodingFormat, params: impl IntoIterator<Item = EncodingParam>) -> Self {
        Self {
            format,
            params: params.into_iter().collect(),
        }
    }

    pub fn with_param(mut self, key: EncodingParamKey, value: i32) -> Self {
        self.params.push(EncodingParam::new(key, value));
        self
    }

    pub fn format(&self) -> EncodingFormat {
        self.format
    }

    pub fn params(&self) -> &[EncodingParam] {
        &self.params
    }

    /// Value of `key`; when a key repeats, the last occurrence wins.
    pub fn param(&self, key: EncodingParamKey) -> Option<i32> {
        self.params
            .iter()
            .rev()
            .find(|p| p.key == key)
            .map(|p| p.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extensions_round_trip_through_from_str() {
        for format in EncodingFormat::ALL {
            assert_eq!(format.extension().parse::<EncodingFormat>(), Ok(format));
        }
    }

    #[test]
    fn from_str_accepts_aliases_and_dots() {
        assert_eq!(".JPEG".parse(), Ok(EncodingFormat::Jpeg));
        assert_eq!("tiff".parse(), Ok(EncodingFormat::Tiff));
        assert_eq!(" Bitmap ".parse(), Ok(EncodingFormat::Bitmap));
        assert!("gif".parse::<EncodingFormat>().is_err());
    }

    #[test]
    fn default_config_is_png_without_params() {
        let config = EncoderConfig::default();
        assert_eq!(config.format(), EncodingFormat::Png);
        assert!(config.params().is_empty());
    }

    #[test]
    fn param_lookup_prefers_last_occurrence() {
        let config = EncoderConfig::new(EncodingFormat::Jpeg)
            .with_param(EncodingParamKey::JpegQuality, 40)
            .with_param(EncodingParamKey::PngCompression, 3)
            .with_param(EncodingParamKey::JpegQuality, 90);

        assert_eq!(config.param(EncodingParamKey::JpegQuality), Some(90));
        assert_eq!(config.param(EncodingParamKey::PngCompression), Some(3));
        assert_eq!(config.param(EncodingParamKey::PbmThreshold), None);
        assert_eq!(config.params().len(), 3, "Order and duplicates are preserved");
    }
}
