// Pipeline domains
pub mod delivery;
pub mod ingest;
pub mod jobs;
