//! Host-side toolkit for a family of Unisoc/Spreadtrum feature-phone SoCs: the framed
//! boot-and-flash-loader (BSL) serial protocol, and the "stone" flash backup container format.
//!
//! The protocol side is built around [`session::Session`], generic over any [`transport::Transport`]:
//! construct a transport, build a [`session::SessionConfig`], and drive the FDL1 → FDL2 → flash
//! workflow through its methods. The container side is a single entry point,
//! [`stone::unpack_stone`], returning the artifacts found inside a stone image without touching
//! the filesystem itself.

pub mod commands;
pub mod frame;
pub mod lzma;
pub mod profiles;
pub mod session;
pub mod stone;
pub mod transport;
