//! Importer for the legacy Hochschulstraße member database.
//!
//! Reads a snapshot of the legacy schema, runs the synchronous translation
//! pipeline in [`importer`], and hands the resulting object buffer to
//! [`target::persist`] (or a dry-run dump). See the module docs for the
//! individual pieces.

pub mod importer;
pub mod logging;
pub mod operational;
pub mod source;
pub mod target;
