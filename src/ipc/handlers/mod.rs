pub mod core;
pub mod councils;
pub mod import_export;
pub mod lifecycle;
pub mod locks;
pub mod scoring;
pub mod setup;
pub mod templates;
