//! blockmesh - redundant encrypted block-distribution storage.
//!
//! A central coordinator splits files into fixed-size encrypted blocks and
//! scatters them with configurable duplication across a pool of TCP-connected
//! storage peers. XOR parity groups with per-block hashes let a restore detect
//! corruption and rebuild one lost block per group; a full reconstruction
//! restores, wipes, and redistributes every known file.
//!
//! The library exposes everything the two binaries are built from, so the
//! server can be embedded and driven through its coordinator inbox and UI
//! event bus.

// ===== PROTOCOL AND PRIMITIVES =====
pub mod blocks; // block identity and on-disk block file naming
pub mod crypto; // AES-CTR block encryption, SHA-256, XOR parity
pub mod protocol; // wire messages, payload codec, frame codec

// ===== SERVER SIDE =====
pub mod coordinator; // single-consumer event loop owning all state
pub mod database; // durable metadata store for distributed files
pub mod distribute; // block scatter engine
pub mod messages; // typed messages of the internal buses
pub mod reconstruct; // restore-wipe-redistribute engine
pub mod restore; // block collection, validation, and repair engine
pub mod server; // wiring and the embeddable server handle
pub mod session; // peer session layer (acceptor, readers, sender)
pub mod tasks; // running task table

// ===== PEER SIDE =====
pub mod peer; // storage peer daemon

// ===== SHARED SCAFFOLDING =====
pub mod cli; // clap parsers for the binaries
pub mod config; // optional TOML configuration file
pub mod error; // error kinds and result alias
pub mod logging; // tracing subscriber setup
