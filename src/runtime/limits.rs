// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

/// Descriptor-count hint handed to the event hub when it is created.
pub const HUB_SIZE_HINT: usize = 50_000;

/// Maximum number of readiness events harvested in a single poll.
pub const POLL_BATCH_MAX: usize = 1024;

/// Maximum size for a single receive into a socket's accumulation buffer.
/// This is set to be the largest power of two that fits in 9000-byte jumbo frames.
pub const RECVBUF_SIZE_MAX: usize = 8192;

/// Backlog for listening sockets.
pub const LISTEN_BACKLOG: i32 = 128;
