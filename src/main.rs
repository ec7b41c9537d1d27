use clap::Parser;
use std::process;
use ungraded::{
    logging, Cli, OutputFormatter, OutputManager, UngradedError, UngradedExtractor, UserFriendlyError,
};

#[tokio::main]
async fn main() {
    let exit_code = run().await;
    process::exit(exit_code);
}

async fn run() -> i32 {
    let cli = Cli::parse();
    logging::init_logging(&cli.logging_options());

    if cli.generate_config {
        return handle_generate_config(&cli);
    }

    let extractor = match UngradedExtractor::from_cli(&cli) {
        Ok(extractor) => extractor,
        Err(e) => {
            print_startup_error(&cli, &e);
            return exit_code(&e);
        }
    };

    if cli.dry_run {
        return handle_dry_run(&cli, &extractor);
    }

    match extractor.extract(cli.course_name()).await {
        Ok(report) => {
            extractor.output_formatter().print_extraction_report(&report);

            if report.has_warnings() {
                2
            } else {
                0
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "extraction failed");
            extractor.handle_error(&e);
            exit_code(&e)
        }
    }
}

fn exit_code(error: &UngradedError) -> i32 {
    match error {
        UngradedError::Cancelled => 130,
        UngradedError::InvalidCourseName { .. } => 2,
        UngradedError::InputNotFound { .. } => 3,
        UngradedError::DecryptorNotFound { .. } => 4,
        UngradedError::Decryption { .. } => 5,
        UngradedError::NoUngradedProblems { .. } => 6,
        UngradedError::Permission { .. } => 7,
        UngradedError::OutputDirectoryExists { .. } | UngradedError::OutputContainsInput { .. } => 8,
        UngradedError::Timeout { .. } => 9,
        UngradedError::StructureParse { .. }
        | UngradedError::DanglingReference { .. }
        | UngradedError::MissingColumn { .. }
        | UngradedError::EmptyTable => 10,
        _ => 1,
    }
}

fn handle_generate_config(cli: &Cli) -> i32 {
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| "ungraded.toml".into());

    if config_path.exists() && !cli.force {
        eprintln!(
            "Configuration file already exists: {} (use --force to overwrite)",
            config_path.display()
        );
        return 8;
    }

    match UngradedExtractor::generate_sample_config(&config_path) {
        Ok(()) => {
            println!("Generated sample configuration file: {}", config_path.display());
            println!("\nTo use this configuration:");
            println!("  ungraded <COURSE> --config {}", config_path.display());
            println!("\nEdit the file to customize settings for your needs.");
            0
        }
        Err(e) => {
            eprintln!("Failed to generate configuration file: {}", e.user_message());
            if let Some(suggestion) = e.suggestion() {
                eprintln!("Suggestion: {}", suggestion);
            }
            1
        }
    }
}

fn handle_dry_run(cli: &Cli, extractor: &UngradedExtractor) -> i32 {
    let formatter = extractor.output_formatter();
    let config = extractor.config();
    let plan = extractor.plan(cli.course_name());

    formatter.print_header("Dry run: nothing will be decrypted or written");

    println!("  Course: {}", plan.course);
    println!("  Course structure: {}", plan.structure_file.display());
    println!("    command: {}", plan.structure_command);
    println!("  Student modules: {}", plan.student_module_file.display());
    println!("    command: {}", plan.student_module_command);
    println!("  Output directory: {}", plan.output_directory.display());
    println!(
        "  Containers: '{}' without '{}' metadata; problems: '{}'",
        config.filter.container_category, config.filter.graded_marker, config.filter.problem_category
    );
    if !config.filter.exclude_sections.is_empty() {
        println!("  Excluded sections: {}", config.filter.exclude_sections.join(", "));
    }
    println!("  Decryption timeout: {} seconds", config.decrypt.timeout);

    formatter.print_separator();

    let mut code = 0;

    let missing = plan.missing_inputs();
    if missing.is_empty() {
        formatter.success("Both input files exist");
    } else {
        for path in missing {
            formatter.error(&format!("Input file not found: {}", path.display()));
        }
        code = 3;
    }

    if config.decrypt.enabled && which::which(&config.decrypt.program).is_err() {
        formatter.error(&format!("Decryption tool not found: {}", config.decrypt.program));
        if code == 0 {
            code = 4;
        }
    }

    match OutputManager::for_inspection(plan.output_directory.clone()).and_then(|manager| {
        manager
            .with_force_overwrite(cli.force)
            .with_protected_paths(plan.input_files())
            .check_available()
    }) {
        Ok(true) => formatter.warning("Force mode enabled - existing output would be replaced"),
        Ok(false) => {}
        Err(e) => {
            formatter.error(&e.user_message());
            if code == 0 {
                code = exit_code(&e);
            }
        }
    }

    if code == 0 {
        formatter.success("Dry run completed successfully");
        formatter.info("Run without --dry-run to perform the extraction");
    }

    code
}

fn print_startup_error(cli: &Cli, error: &UngradedError) {
    let formatter = OutputFormatter::new(cli.output_mode(), 0, false);
    formatter.print_user_friendly_error(error);
}
