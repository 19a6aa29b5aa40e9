//! Ambient I/O for the attack-verification engine: configuration (C, §6A), the module
//! repository loader (C9), the event source (C10), the CVSS fetcher (C11), and the CSV
//! report writer (C12).

pub mod config;
pub mod cvss;
pub mod event_source;
pub mod module_repo;
pub mod report;

pub use config::{address_in_any_subnet, Config, InternalSubnet};
pub use cvss::CvssFetcher;
pub use event_source::read_events;
pub use module_repo::{select_binding, ModuleRepoParser};
pub use report::{ReportEntry, ReportWriter};
