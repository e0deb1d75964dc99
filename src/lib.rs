pub mod config;
pub mod csv_builder;
pub mod error;
pub mod html_reader;
pub mod logger;
pub mod pipeline;
pub mod query;
pub mod rate_limiter;
pub mod result_writer;
pub mod transport;

// Exporting types for convenience
pub use config::Config;
pub use csv_builder::{CsvBuilder, Row};
pub use error::{EnrichError, Result};
pub use html_reader::{MetaReader, MetaReport};
pub use pipeline::{EnrichmentSource, KeyMode, Pipeline, PipelineOptions, RunSummary};
pub use query::{
    ProviderKind, QueryProvider, QueryRequest, QueryResult, RankProvider, SemrushQuery,
    SerpstatQuery,
};
pub use result_writer::ResultWriter;
pub use transport::{HttpTransport, Transport};
