// Formentry - Clinical Form Compiler and Submission Engine
// Copyright (c) 2025 Formentry Contributors
// Licensed under the MIT License

//! CLI interface and argument parsing
//!
//! This module provides the command-line interface for Formentry using clap.

pub mod commands;

use clap::{Parser, Subcommand};

/// Formentry - clinical form compiler and submission engine
#[derive(Parser, Debug)]
#[command(name = "formentry")]
#[command(version, about, long_about = None)]
#[command(author = "Formentry Contributors")]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "formentry.toml", env = "FORMENTRY_CONFIG")]
    pub config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "FORMENTRY_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compile a form template and print its widgets
    Compile(commands::compile::CompileArgs),

    /// Plan (and optionally apply) a form submission against a fixture
    Submit(commands::submit::SubmitArgs),

    /// Validate configuration file
    ValidateConfig(commands::validate::ValidateArgs),

    /// Initialize a new configuration file
    Init(commands::init::InitArgs),
}
