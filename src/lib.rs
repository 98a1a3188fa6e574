//! Shared infrastructure for building a Linux distribution from an XML book.
//!
//! ScratchKit turns an LFS-style XML "book" into installed packages through
//! three sequential, independently re-runnable stages:
//!
//! ```text
//! XML book ──► parser ──► plan JSON ──► scripter ──► NNNN_*.sh ──► executer ──► packages
//!                ▲                        ▲                          │
//!            parser.toml             scripter.toml              executer.toml
//!                ▲                    + templates                    │
//!        custom-*.toml                                    download/upload repos
//! ```
//!
//! - **parser** - XPath-driven extraction of typed build entries, custom
//!   package injection and dependency ordering across declared cycles
//! - **scripter** - template selection, placeholder expansion and rewrite
//!   rules producing one executable script per entry
//! - **executer** - host or chroot script execution, tar packaging with
//!   SHA-256 metadata, tiered cache lookup, verified installation and
//!   publishing
//!
//! Each profile (`profiles/<book>/<profile>/`) carries the TOML configs and
//! templates for one build variant; stages only ever read them.

pub mod archive;
pub mod book;
pub mod config;
pub mod error;
pub mod executer;
pub mod lookup;
pub mod parser;
pub mod plan;
pub mod profiles;
pub mod scripter;

pub use config::BuilderConfig;
pub use error::{category_tag, SkwError};
pub use plan::{BuildEntry, SourceSet};
