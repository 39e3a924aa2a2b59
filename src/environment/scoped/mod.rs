//! Scoped-process execution backend (`systemd-run --scope` + `numactl`)

mod backend;

pub use backend::ScopedProcessBackend;
