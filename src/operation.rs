//! Operation descriptors: the closed set of transformations and their typed
//! parameters.
//!
//! The boundary layer hands us a symbolic operation name plus a bag of string
//! parameters. [`Operation::parse`] turns that pair into a strongly-typed
//! [`Operation`] exactly once, so every parameter is validated before any
//! artifact is read and no operation ever starts on a malformed request.

use crate::error::TransformError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Raw string parameters as received from the boundary layer.
pub type Params = BTreeMap<String, String>;

// ── Media types ──────────────────────────────────────────────────────────

/// Upload media types accepted by the staging area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Pdf,
    Doc,
    Docx,
    Xls,
    Xlsx,
    Ppt,
    Pptx,
    Odt,
    Ods,
    Odp,
    Jpeg,
    Png,
}

impl MediaType {
    const ALL: [MediaType; 12] = [
        MediaType::Pdf,
        MediaType::Doc,
        MediaType::Docx,
        MediaType::Xls,
        MediaType::Xlsx,
        MediaType::Ppt,
        MediaType::Pptx,
        MediaType::Odt,
        MediaType::Ods,
        MediaType::Odp,
        MediaType::Jpeg,
        MediaType::Png,
    ];

    pub fn mime(self) -> &'static str {
        match self {
            MediaType::Pdf => "application/pdf",
            MediaType::Doc => "application/msword",
            MediaType::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            MediaType::Xls => "application/vnd.ms-excel",
            MediaType::Xlsx => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            MediaType::Ppt => "application/vnd.ms-powerpoint",
            MediaType::Pptx => {
                "application/vnd.openxmlformats-officedocument.presentationml.presentation"
            }
            MediaType::Odt => "application/vnd.oasis.opendocument.text",
            MediaType::Ods => "application/vnd.oasis.opendocument.spreadsheet",
            MediaType::Odp => "application/vnd.oasis.opendocument.presentation",
            MediaType::Jpeg => "image/jpeg",
            MediaType::Png => "image/png",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            MediaType::Pdf => "pdf",
            MediaType::Doc => "doc",
            MediaType::Docx => "docx",
            MediaType::Xls => "xls",
            MediaType::Xlsx => "xlsx",
            MediaType::Ppt => "ppt",
            MediaType::Pptx => "pptx",
            MediaType::Odt => "odt",
            MediaType::Ods => "ods",
            MediaType::Odp => "odp",
            MediaType::Jpeg => "jpg",
            MediaType::Png => "png",
        }
    }

    /// Look up a media type by MIME string. Unknown types are rejected.
    pub fn from_mime(mime: &str) -> Result<Self, TransformError> {
        let mime = mime.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|m| m.mime() == mime)
            .ok_or_else(|| {
                TransformError::validation(
                    "Invalid file type. Only PDF, Word, Excel, and Images are allowed.",
                )
            })
    }

    /// Guess a media type from a file name's extension.
    pub fn from_file_name(name: &str) -> Result<Self, TransformError> {
        let ext = name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "jpeg" | "jpg" => Ok(MediaType::Jpeg),
            other => Self::ALL
                .into_iter()
                .find(|m| m.extension() == other)
                .ok_or_else(|| {
                    TransformError::validation(format!(
                        "Invalid file type for '{name}'. Only PDF, Word, Excel, and Images are allowed."
                    ))
                }),
        }
    }

    pub fn is_pdf(self) -> bool {
        self == MediaType::Pdf
    }

    pub fn is_image(self) -> bool {
        matches!(self, MediaType::Jpeg | MediaType::Png)
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime())
    }
}

// ── Parameters ───────────────────────────────────────────────────────────

/// Compression tuning level.
///
/// This is an opaque tuning enum, not "higher is smaller": `High` disables
/// the structural optimization pass and only re-compresses streams. See
/// [`CompressionLevel::structural_optimization`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl CompressionLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            CompressionLevel::Low => "low",
            CompressionLevel::Medium => "medium",
            CompressionLevel::High => "high",
        }
    }

    /// Whether the object pruning / renumbering pass runs for this level.
    pub fn structural_optimization(self) -> bool {
        self != CompressionLevel::High
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotateParams {
    /// Relative rotation in degrees; any integer, applied mod 360.
    pub angle: i64,
}

impl Default for RotateParams {
    fn default() -> Self {
        Self { angle: 90 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressParams {
    pub level: CompressionLevel,
    /// JPEG quality (1–100) used when re-encoding embedded images.
    pub quality: u8,
    pub remove_metadata: bool,
}

impl Default for CompressParams {
    fn default() -> Self {
        Self {
            level: CompressionLevel::Medium,
            quality: 70,
            remove_metadata: false,
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct ProtectParams {
    pub password: String,
}

#[derive(Clone, PartialEq, Eq, Default)]
pub struct UnlockParams {
    pub password: String,
}

// Passwords never reach logs.
impl fmt::Debug for ProtectParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtectParams").field("password", &"<redacted>").finish()
    }
}

impl fmt::Debug for UnlockParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnlockParams").field("password", &"<redacted>").finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatermarkParams {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrganizeParams {
    /// 1-based page order as supplied; out-of-range entries are filtered
    /// against the actual page count at execution time.
    pub order: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCompressParams {
    pub quality: u8,
}

impl Default for ImageCompressParams {
    fn default() -> Self {
        Self { quality: 80 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlToPdfParams {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfAParams {
    pub conformance: String,
}

impl Default for PdfAParams {
    fn default() -> Self {
        Self {
            conformance: "pdfa-2b".to_string(),
        }
    }
}

const PDFA_CONFORMANCE_LEVELS: [&str; 8] = [
    "pdfa-1b", "pdfa-1a", "pdfa-2b", "pdfa-2u", "pdfa-2a", "pdfa-3b", "pdfa-3u", "pdfa-3a",
];

/// Features that have no implementation in this deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnsupportedFeature {
    Ocr,
    PdfToWord,
    PdfToImage,
    WordToPdf,
}

impl UnsupportedFeature {
    pub fn name(self) -> &'static str {
        match self {
            UnsupportedFeature::Ocr => "ocr",
            UnsupportedFeature::PdfToWord => "pdf-to-word",
            UnsupportedFeature::PdfToImage => "pdf-to-image",
            UnsupportedFeature::WordToPdf => "word-to-pdf",
        }
    }
}

// ── Operation ────────────────────────────────────────────────────────────

/// Every transformation the dispatcher can run, each with its own parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Merge,
    Split,
    Rotate(RotateParams),
    Compress(CompressParams),
    Protect(ProtectParams),
    Unlock(UnlockParams),
    Watermark(WatermarkParams),
    PageNumbers,
    Organize(OrganizeParams),
    ImageToPdf,
    ImageCompress(ImageCompressParams),
    OfficeToPdf,
    Repair,
    HtmlToPdf(HtmlToPdfParams),
    PdfA(PdfAParams),
    Unsupported(UnsupportedFeature),
}

/// How many inputs an operation takes and which media types it accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputRule {
    pub min: usize,
    pub max: usize,
    pub accepts: InputKind,
    /// Message returned when fewer than `min` inputs are supplied.
    pub missing_message: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Pdf,
    Image,
    /// Any allowed upload type; unusable ones are the operation's concern.
    Any,
    None,
}

impl Operation {
    /// Parse a symbolic operation name and its raw parameters.
    pub fn parse(name: &str, params: &Params) -> Result<Self, TransformError> {
        let op = match name.trim().to_ascii_lowercase().as_str() {
            "merge" => Operation::Merge,
            "split" => Operation::Split,
            "rotate" => Operation::Rotate(RotateParams {
                angle: parse_int(params, "angle")?.unwrap_or(90),
            }),
            "compress" => Operation::Compress(parse_compress(params)?),
            "protect" => {
                let password = param(params, "password").unwrap_or_default();
                if password.is_empty() {
                    return Err(TransformError::validation("Password is required"));
                }
                Operation::Protect(ProtectParams {
                    password: password.to_string(),
                })
            }
            "unlock" => Operation::Unlock(UnlockParams {
                password: param(params, "password").unwrap_or_default().to_string(),
            }),
            "watermark" => {
                let text = param(params, "text").unwrap_or_default();
                if text.trim().is_empty() {
                    return Err(TransformError::validation("Watermark text is required"));
                }
                Operation::Watermark(WatermarkParams {
                    text: text.to_string(),
                })
            }
            "page-numbers" | "page_numbers" | "paginate" => Operation::PageNumbers,
            "organize" | "reorder" => Operation::Organize(OrganizeParams {
                order: parse_page_order(param(params, "pages").unwrap_or_default())?,
            }),
            "image-to-pdf" | "image_to_pdf" => Operation::ImageToPdf,
            "image-compress" | "image_compress" => Operation::ImageCompress(ImageCompressParams {
                quality: parse_quality(params, 80)?,
            }),
            "office-to-pdf" | "office_to_pdf" => Operation::OfficeToPdf,
            "repair" => Operation::Repair,
            "html-to-pdf" | "html_to_pdf" => {
                let url = param(params, "url").unwrap_or_default().trim();
                if url.is_empty() {
                    return Err(TransformError::validation("URL is required"));
                }
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(TransformError::validation(format!(
                        "Invalid URL '{url}': must start with http:// or https://"
                    )));
                }
                Operation::HtmlToPdf(HtmlToPdfParams {
                    url: url.to_string(),
                })
            }
            "pdfa" | "pdf-to-pdfa" => {
                let conformance = param(params, "conformance")
                    .map(|c| c.trim().to_ascii_lowercase())
                    .filter(|c| !c.is_empty())
                    .unwrap_or_else(|| PdfAParams::default().conformance);
                if !PDFA_CONFORMANCE_LEVELS.contains(&conformance.as_str()) {
                    return Err(TransformError::validation(format!(
                        "Unknown PDF/A conformance '{conformance}'"
                    )));
                }
                Operation::PdfA(PdfAParams { conformance })
            }
            "ocr" => Operation::Unsupported(UnsupportedFeature::Ocr),
            "pdf-to-word" => Operation::Unsupported(UnsupportedFeature::PdfToWord),
            "pdf-to-image" => Operation::Unsupported(UnsupportedFeature::PdfToImage),
            "word-to-pdf" => Operation::Unsupported(UnsupportedFeature::WordToPdf),
            other => {
                return Err(TransformError::validation(format!(
                    "Unknown operation '{other}'"
                )))
            }
        };
        Ok(op)
    }

    /// Stable symbolic name, used in logs and output file prefixes.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Merge => "merge",
            Operation::Split => "split",
            Operation::Rotate(_) => "rotate",
            Operation::Compress(_) => "compress",
            Operation::Protect(_) => "protect",
            Operation::Unlock(_) => "unlock",
            Operation::Watermark(_) => "watermark",
            Operation::PageNumbers => "page-numbers",
            Operation::Organize(_) => "organize",
            Operation::ImageToPdf => "image-to-pdf",
            Operation::ImageCompress(_) => "image-compress",
            Operation::OfficeToPdf => "office-to-pdf",
            Operation::Repair => "repair",
            Operation::HtmlToPdf(_) => "html-to-pdf",
            Operation::PdfA(_) => "pdfa",
            Operation::Unsupported(f) => f.name(),
        }
    }

    /// Prefix of the produced file name (`merged-…`, `rotated-…`).
    pub fn output_prefix(&self) -> &'static str {
        match self {
            Operation::Merge => "merged",
            Operation::Split => "split",
            Operation::Rotate(_) => "rotated",
            Operation::Compress(_) => "compressed",
            Operation::Protect(_) => "protected",
            Operation::Unlock(_) => "unlocked",
            Operation::Watermark(_) => "watermarked",
            Operation::PageNumbers => "numbered",
            Operation::Organize(_) => "organized",
            Operation::ImageToPdf => "images-to-pdf",
            Operation::ImageCompress(_) => "compressed",
            Operation::OfficeToPdf => "converted",
            Operation::Repair => "repaired",
            Operation::HtmlToPdf(_) => "webpage",
            Operation::PdfA(_) => "converted_pdfa",
            Operation::Unsupported(_) => "unsupported",
        }
    }

    /// True for operations delegated to the remote conversion service.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            Operation::OfficeToPdf | Operation::Repair | Operation::HtmlToPdf(_) | Operation::PdfA(_)
        )
    }

    /// Input arity and media constraints.
    pub fn input_rule(&self) -> InputRule {
        const SINGLE_PDF: InputRule = InputRule {
            min: 1,
            max: 1,
            accepts: InputKind::Pdf,
            missing_message: "No file uploaded",
        };
        match self {
            Operation::Merge => InputRule {
                min: 2,
                max: 10,
                accepts: InputKind::Pdf,
                missing_message: "Please upload at least 2 PDF files",
            },
            Operation::ImageToPdf => InputRule {
                min: 1,
                max: 50,
                accepts: InputKind::Any,
                missing_message: "Please upload at least one image",
            },
            Operation::ImageCompress(_) => InputRule {
                min: 1,
                max: 1,
                accepts: InputKind::Image,
                missing_message: "No file provided",
            },
            Operation::OfficeToPdf => InputRule {
                min: 1,
                max: 1,
                accepts: InputKind::Any,
                missing_message: "No file uploaded",
            },
            Operation::HtmlToPdf(_) => InputRule {
                min: 0,
                max: 0,
                accepts: InputKind::None,
                missing_message: "URL is required",
            },
            Operation::Unsupported(_) => InputRule {
                min: 0,
                max: usize::MAX,
                accepts: InputKind::Any,
                missing_message: "No file uploaded",
            },
            _ => SINGLE_PDF,
        }
    }
}

// ── Parameter coercion ───────────────────────────────────────────────────

fn param<'a>(params: &'a Params, key: &str) -> Option<&'a str> {
    params.get(key).map(String::as_str)
}

/// Integer parameter; absent or blank means "use the default".
fn parse_int(params: &Params, key: &str) -> Result<Option<i64>, TransformError> {
    match param(params, key).map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => raw
            .parse::<i64>()
            .map(Some)
            .map_err(|_| TransformError::validation(format!("Invalid {key} '{raw}': expected an integer"))),
    }
}

fn parse_bool(params: &Params, key: &str) -> Result<bool, TransformError> {
    match param(params, key).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(false),
        Some(v) => match v.as_str() {
            "" | "false" | "0" | "no" | "off" => Ok(false),
            "true" | "1" | "yes" | "on" => Ok(true),
            _ => Err(TransformError::validation(format!(
                "Invalid {key} '{v}': expected a boolean"
            ))),
        },
    }
}

fn parse_quality(params: &Params, default: u8) -> Result<u8, TransformError> {
    match parse_int(params, "quality")? {
        None => Ok(default),
        Some(q) if (1..=100).contains(&q) => Ok(q as u8),
        Some(q) => Err(TransformError::validation(format!(
            "Invalid quality {q}: must be between 1 and 100"
        ))),
    }
}

fn parse_compress(params: &Params) -> Result<CompressParams, TransformError> {
    let level = match param(params, "level").map(|l| l.trim().to_ascii_lowercase()) {
        None => CompressionLevel::default(),
        Some(l) => match l.as_str() {
            "" | "medium" => CompressionLevel::Medium,
            "low" => CompressionLevel::Low,
            "high" => CompressionLevel::High,
            other => {
                return Err(TransformError::validation(format!(
                    "Invalid compression level '{other}': expected low, medium or high"
                )))
            }
        },
    };
    // The boundary layer historically sent `removeMetadata`.
    let remove_metadata = if params.contains_key("remove_metadata") {
        parse_bool(params, "remove_metadata")?
    } else {
        parse_bool(params, "removeMetadata")?
    };
    Ok(CompressParams {
        level,
        quality: parse_quality(params, 70)?,
        remove_metadata,
    })
}

/// Parse a page order given either as a JSON array (`[3,1]`, `["3","1"]`) or
/// a comma-separated string (`3,1`).
///
/// Entries that are not integers are dropped, like out-of-range entries are
/// later; only an absent or unparseable list is an error.
pub fn parse_page_order(raw: &str) -> Result<Vec<i64>, TransformError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(TransformError::validation("Invalid page order format"));
    }

    if let Ok(serde_json::Value::Array(items)) = serde_json::from_str::<serde_json::Value>(raw) {
        return Ok(items
            .iter()
            .filter_map(|v| match v {
                serde_json::Value::Number(n) => n.as_i64(),
                serde_json::Value::String(s) => s.trim().parse().ok(),
                _ => None,
            })
            .collect());
    }

    Ok(raw
        .trim_matches(|c| c == '[' || c == ']')
        .split(',')
        .filter_map(|p| p.trim().parse::<i64>().ok())
        .collect())
}
