//! Synchronous IPC contracts: blocking call, busy server, helping, reply.
