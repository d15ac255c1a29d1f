//! # vnc-sidecar
//!
//! Exposes a KubeVirt virtual machine's VNC console over WebSocket.
//!
//! The sidecar runs next to the VM's hypervisor process. A client opens
//! `GET /v1/vnc` with the `plain.kubevirt.io` subprotocol; the sidecar finds
//! the VM's `virt-vnc` Unix socket, dials it and relays bytes in both
//! directions without looking at them.
//!
//! ## Architecture
//!
//! ```text
//! Client (WebSocket)
//!     │
//!     ├── Router (api/)
//!     ├── VNC handler (vnc/handler)
//!     │
//!     ├── Session ── SocketLocator ── /var/run/kubevirt-private/{uuid}/virt-vnc
//!     │         └── ConnectionUpgrader
//!     │
//!     └── ProxyEngine (client->server, server->client, teardown)
//! ```

pub mod api;
pub mod app_state;
pub mod config;
pub mod error;
pub mod vnc;
