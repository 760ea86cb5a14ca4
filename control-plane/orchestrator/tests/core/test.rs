//! In-process scenario tests of the volume service: a registry over the
//! in-memory store, fault-injecting backend drivers and in-process quotas.

mod testlib;
mod volume;
