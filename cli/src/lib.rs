//! jctl CLI - compile a Go program, publish it as an image, run it as a Job.

pub mod commands;
