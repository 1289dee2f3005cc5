//! End-to-end lifecycle scenarios against the in-memory store.

mod notifications;
mod workable;
