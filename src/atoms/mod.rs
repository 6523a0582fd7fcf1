// ── Hivecore Atoms ─────────────────────────────────────────────────────────
// Foundational building blocks shared by every subsystem: the canonical
// error enum, core data types, and shared constants. No I/O lives here.

pub mod constants;
pub mod error;
pub mod types;
