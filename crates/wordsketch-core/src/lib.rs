//! Word sketch engine core: corpus ingestion, sharded co-occurrence
//! reduction, a bit-exact collocations file format, and the query executor
//! that serves it.

pub mod collocations;
pub mod config;
pub mod conllu;
pub mod diagnostics;
pub mod error;
pub mod ingest;
pub mod lexicon;
pub mod pairs;
pub mod pipeline;
pub mod progress;
pub mod query;
pub mod reduce;
pub mod relations;
pub mod sentence_store;
pub mod thread_pool_no_abort;
pub mod token;

pub use collocations::{CollocateRecord, CollocationEntry, CollocationsReader, CollocationsWriter};
pub use config::{BuildConfig, QueryConfig};
pub use error::{Error, InternalError, Result, UserError};
pub use ingest::Ingester;
pub use lexicon::Lexicon;
pub use pipeline::run_build;
pub use progress::BuildReport;
pub use query::{CollocateResult, PrecomputedExecutor, QueryExecutor};
pub use relations::{RelationDef, RelationRegistry};
pub use sentence_store::{SentenceStoreReader, SentenceStoreWriter};
