// Formentry - Clinical Form Compiler and Submission Engine
// Copyright (c) 2025 Formentry Contributors
// Licensed under the MIT License

//! Validate config command implementation

use crate::config::load_config;
use clap::Args;

/// Arguments for the validate-config command
#[derive(Args, Debug)]
pub struct ValidateArgs {}

impl ValidateArgs {
    /// Execute the validate-config command
    pub fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        tracing::info!(config_path = %config_path, "Validating configuration");

        println!("🔍 Validating configuration file: {config_path}");
        println!();

        // load_config validates before returning
        let config = match load_config(config_path) {
            Ok(c) => c,
            Err(e) => {
                println!("❌ Configuration is invalid");
                println!("   Error: {e}");
                return Ok(2);
            }
        };

        println!("✅ Configuration is valid");
        println!();
        println!("Configuration Summary:");
        println!("  Log Level: {}", config.application.log_level);
        println!("  Dry Run: {}", config.application.dry_run);
        println!("  Date Format: {}", config.formats.date_format);
        println!("  Datetime Format: {}", config.formats.datetime_format);
        println!(
            "  True/False Concepts: {}/{}",
            config.concepts.true_concept, config.concepts.false_concept
        );
        println!(
            "  Default Location: {}",
            config.defaults.location.as_deref().unwrap_or("(none)")
        );
        println!(
            "  Default Provider: {}",
            config.defaults.provider.as_deref().unwrap_or("(none)")
        );
        println!(
            "  Legacy Cross-Parent Binding: {}",
            config.matching.legacy_cross_parent_binding
        );
        println!("  Order Stop Offset: {}s", config.orders.stop_offset_seconds);
        println!();
        Ok(0)
    }
}
