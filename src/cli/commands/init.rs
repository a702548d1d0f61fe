// Formentry - Clinical Form Compiler and Submission Engine
// Copyright (c) 2025 Formentry Contributors
// Licensed under the MIT License

//! Init command implementation
//!
//! Writes a sample configuration file.

use clap::Args;
use std::fs;
use std::path::Path;

/// Arguments for the init command
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Path where to create the configuration file
    #[arg(short, long, default_value = "formentry.toml")]
    pub output: String,

    /// Include example values and comments
    #[arg(long)]
    pub with_examples: bool,

    /// Overwrite existing file
    #[arg(long)]
    pub force: bool,
}

impl InitArgs {
    /// Execute the init command
    pub fn execute(&self) -> anyhow::Result<i32> {
        tracing::info!(output = %self.output, "Initializing configuration file");

        println!("📝 Initializing Formentry configuration");
        println!();

        if Path::new(&self.output).exists() && !self.force {
            println!("❌ Configuration file already exists: {}", self.output);
            println!("   Use --force to overwrite");
            return Ok(2);
        }

        let config_content = if self.with_examples {
            Self::generate_config_with_examples()
        } else {
            Self::generate_minimal_config()
        };

        match fs::write(&self.output, config_content) {
            Ok(_) => {
                println!("✅ Configuration file created: {}", self.output);
                println!();
                println!("Next steps:");
                println!("  1. Edit {} with your site's concepts and defaults", self.output);
                println!("  2. Validate configuration: formentry validate-config");
                println!("  3. Compile a form: formentry compile my-form.xml");
                println!();
                Ok(0)
            }
            Err(e) => {
                println!("❌ Failed to write configuration file");
                println!("   Error: {e}");
                Ok(5)
            }
        }
    }

    fn generate_minimal_config() -> String {
        r#"# Formentry Configuration File

[application]
log_level = "info"
dry_run = false

[formats]
date_format = "%Y-%m-%d"
datetime_format = "%Y-%m-%d %H:%M"
time_format = "%H:%M"

[concepts]
true_concept = 1065
false_concept = 1066

[matching]
legacy_cross_parent_binding = true

[orders]
stop_offset_seconds = 1

[logging]
local_enabled = false
local_path = "/var/log/formentry"
local_rotation = "daily"
local_max_size_mb = 100
"#
        .to_string()
    }

    fn generate_config_with_examples() -> String {
        r#"# Formentry Configuration File
#
# Values may reference environment variables with ${VAR_NAME}. Any key can
# also be overridden with FORMENTRY_<SECTION>_<KEY>, for example
# FORMENTRY_FORMATS_DATE_FORMAT="%d/%m/%Y".

[application]
# trace | debug | info | warn | error
log_level = "info"

# Plan submissions without writing them
dry_run = false

[formats]
# chrono format strings used to parse and display submitted values
date_format = "%Y-%m-%d"
datetime_format = "%Y-%m-%d %H:%M"
time_format = "%H:%M"

[concepts]
# Coded answers that stand in for boolean true and false
true_concept = 1065
false_concept = 1066

# Question holding free-text order instructions, if the site has one
# free_text_instructions = 162749

[defaults]
# Resolved by default="SystemDefault" on encounterLocation and encounterProvider.
# Accepts an id, uuid or name.
# location = "${FORMENTRY_SITE_LOCATION}"
# provider = "Unknown Provider"

[matching]
# Let a nested obsgroup bind a group recorded directly on the encounter when
# its grouping concept is unique at that level. Older forms depend on it.
legacy_cross_parent_binding = true

[orders]
# A revised or renewed order stops this many seconds before its successor starts
stop_offset_seconds = 1

# Standard regimens offered by <standardRegimen regimenCodes="...">. Each
# component becomes one drug order when the regimen is chosen.
# [[regimens]]
# code = "TRIOMUNE"
# name = "Triomune-30"
#
# [[regimens.components]]
# drug = 2
# dose = 1.0
# frequency = 160858
# instructions = "twice daily"

[logging]
# JSON log files in addition to console output
local_enabled = false
local_path = "/var/log/formentry"

# daily | hourly
local_rotation = "daily"
local_max_size_mb = 100
"#
        .to_string()
    }
}
