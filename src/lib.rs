//! # pktblast
//!
//! A multi-backend IPv4 packet transmission core, built to push packets at
//! the highest rate the host permits through one of several mutually
//! exclusive send paths.
//!
//! ## Supported Backends
//!
//! - **raw socket** - portable L3 path with the header-included option
//! - **sendmmsg** - kernel-side batched datagram sends (Linux 3.0+)
//! - **io_uring** - submission-queue sendmsg batches (Linux 5.1+, feature: `io_uring`)
//! - **AF_XDP** - kernel-bypass sockets over a shared frame arena (Linux 4.18+, feature: `af_xdp`)
//! - **DPDK** - userspace poll-mode ports (feature: `dpdk`)
//!
//! ## Quick Start
//!
//! ```no_run
//! use pktblast::{Config, Dest, Driver};
//!
//! # fn main() -> pktblast::Result<()> {
//! let mut driver = Driver::open(Config::default())?;
//! let dest = "127.0.0.1:9000".parse().unwrap();
//! let payload = [0u8; 64];
//! let accepted = driver.send_batch(&[&payload[..]], Dest::Single(dest))?;
//! println!("accepted {accepted}, stats {:?}", driver.stats());
//! # Ok(())
//! # }
//! ```

// Backend modules (conditionally compiled)
#[cfg(all(target_os = "linux", feature = "af_xdp"))]
pub mod af_xdp;
#[cfg(all(target_os = "linux", feature = "dpdk"))]
pub mod dpdk;
#[cfg(target_os = "linux")]
pub mod mmsg;
pub mod raw;
#[cfg(all(target_os = "linux", feature = "io_uring"))]
pub mod uring;

// Core API
pub mod api;
pub mod caps;
pub mod checksum;
pub mod driver;
pub mod errors;
pub mod packet;
pub mod platform;
pub mod select;

pub use api::{Backend, Dest, RxFrame, Stats};
pub use driver::{Config, Driver};
pub use errors::{Error, Result};
pub use select::{select_backend, BackendKind};
