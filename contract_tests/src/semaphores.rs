//! Semaphore contracts: banked counts, blocking `dn`, wakeup hand-off,
//! zero-consume and deadlines.
