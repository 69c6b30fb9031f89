//! Converter trait: the seam between workers and the conversion program.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use queue_core::{ConversionError, JobId, JobKind};

/// Result type for converters.
pub type ConversionResult = Result<ConversionOutput, ConversionError>;

/// Future type for async converters.
pub type ConversionFuture = Pin<Box<dyn Future<Output = ConversionResult> + Send>>;

/// One conversion to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRequest {
    pub job_id: JobId,
    pub kind: JobKind,
    /// Input documents, in submission order.
    pub inputs: Vec<PathBuf>,
    /// Where the spreadsheet must be written.
    pub output: PathBuf,
}

/// A successful conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionOutput {
    pub output: PathBuf,
    /// Number of documents that went into the output.
    pub count: usize,
    /// Tail of the program's diagnostics, kept for logging.
    pub diagnostics: String,
    pub elapsed: Duration,
}

impl ConversionOutput {
    /// Output for `request` with no diagnostics.
    pub fn for_request(request: &ConversionRequest, elapsed: Duration) -> Self {
        Self {
            output: request.output.clone(),
            count: request.inputs.len(),
            diagnostics: String::new(),
            elapsed,
        }
    }
}

/// Turns PDF inputs into a spreadsheet.
///
/// Implementations must write to `request.output` and report success only
/// once the file is complete.
pub trait Converter: Send + Sync + 'static {
    fn convert(&self, request: ConversionRequest) -> ConversionFuture;
}

/// A simple function-based converter.
pub struct FnConverter<F>
where
    F: Fn(ConversionRequest) -> ConversionFuture + Send + Sync + 'static,
{
    converter: F,
}

impl<F> FnConverter<F>
where
    F: Fn(ConversionRequest) -> ConversionFuture + Send + Sync + 'static,
{
    pub fn new(converter: F) -> Self {
        Self { converter }
    }
}

impl<F> Converter for FnConverter<F>
where
    F: Fn(ConversionRequest) -> ConversionFuture + Send + Sync + 'static,
{
    fn convert(&self, request: ConversionRequest) -> ConversionFuture {
        (self.converter)(request)
    }
}
