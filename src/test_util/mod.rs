//! Utilities for building test messages. They are used for testing the routing core itself, but
//!  they are also exported for testing applications that embed it.

pub mod message;
