//! Startup and recall event delivery, including the cross-CPU IPI path.
