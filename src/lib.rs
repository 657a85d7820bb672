//! Fabline core library.
//!
//! A staged build pipeline for Fortran scientific applications. An
//! application supplies a [`project::ProjectSpecialization`]; the
//! [`pipeline::Pipeline`] copies its sources into a per-toolchain workspace,
//! generates configuration code, preprocesses, runs PSyclone, analyses module
//! dependencies and compiles, archives and links the executable.

pub mod cli;
pub mod config;
pub mod deps;
pub mod hasher;
pub mod logging;
pub mod pipeline;
pub mod project;
pub mod runner;
pub mod stage;
pub mod state;
pub mod status;
pub mod tool;
pub mod toolchain;
