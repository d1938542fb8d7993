//! Flow-classification and packet-processing-pipeline control plane for a
//! family of multi-block programmable network processors: mailbox-based
//! admin-function RPC, a buffer-pool manager, a crypto/timer logical-
//! function layer, NIX packet I/O with inline IPSec and a traffic-manager
//! hierarchy, the NPC flow classifier and MCAM allocator, and the
//! CAT/KM/FLM/HSH/QSL/SLC-LR/PDB/TPE pipeline-module family used by an
//! alternative silicon generation.
//!
//! Layering follows the dependency order documented in each module: L0
//! ([`platform`], [`mailbox`]) → L1 ([`idev`]) → L2 ([`npa`], [`cpt`],
//! [`sso_tim`]) → L3 ([`nix`], [`pipeline`]) → L4 ([`npc`]).

pub mod cpt;
pub mod error;
pub mod idev;
pub mod mailbox;
pub mod nix;
pub mod npa;
pub mod npc;
pub mod pdcp;
pub mod pipeline;
pub mod platform;
pub mod sso_tim;

#[cfg(test)]
pub mod testutil;

pub use error::{RocError, RocResult};
