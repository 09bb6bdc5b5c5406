use super::{
    json_pretty, open_store, Context, EXIT_FAILURE, EXIT_OBJECT_NOT_FOUND, EXIT_PARAMETER_MISSING,
    EXIT_PARTIAL, EXIT_SUCCESS,
};
use enmasse::{
    load, load_env_file, notifier_from_config, CancelFlag, DocumentError, EnmasseError,
    LoadOptions, Reconciler, SyncReport,
};
use std::path::PathBuf;

#[derive(Debug)]
pub struct ImportArgs {
    pub input: PathBuf,
    pub ignore_missing_includes: bool,
    pub exit_on_missing_file: bool,
    pub missing_wait_time: Option<u64>,
    pub env_file: Option<PathBuf>,
    pub json: bool,
}

pub fn run(ctx: &Context, args: &ImportArgs) -> Result<u8, String> {
    if args.input.as_os_str().is_empty() {
        eprintln!("error: --input must not be empty");
        return Ok(EXIT_PARAMETER_MISSING);
    }

    if let Some(env_file) = &args.env_file {
        let count = load_env_file(env_file).map_err(|e| e.to_string())?;
        log::debug!("Loaded {} variable(s) from {}", count, env_file.display());
    }

    let mut config = ctx.config()?;
    if args.ignore_missing_includes {
        config.ignore_missing_includes = true;
    }
    if let Some(wait) = args.missing_wait_time {
        config.missing_wait_time = wait;
    }

    if !args.input.exists() {
        if args.exit_on_missing_file {
            log::warn!(
                "Input file {} does not exist, nothing to import",
                args.input.display()
            );
            return Ok(EXIT_SUCCESS);
        }
        eprintln!("error: input file {} not found", args.input.display());
        return Ok(EXIT_OBJECT_NOT_FOUND);
    }

    let loaded = match load(&args.input, &LoadOptions::from(&config)) {
        Ok(loaded) => loaded,
        Err(e @ DocumentError::IncludeNotFound { .. }) => {
            eprintln!("error: {e}");
            return Ok(EXIT_OBJECT_NOT_FOUND);
        }
        Err(e) => return Err(e.to_string()),
    };
    for diagnostic in &loaded.diagnostics {
        log::warn!("{}", diagnostic);
    }

    let store = open_store(&config)?;

    let cancel = CancelFlag::new();
    let trigger = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        log::warn!("Interrupted, cancelling");
        trigger.cancel();
    }) {
        log::warn!("Failed to install interrupt handler: {}", e);
    }

    let notifier = notifier_from_config(&config.reload, &cancel).map_err(|e| e.to_string())?;

    let reconciler = Reconciler::new(&store, &config)
        .with_notifier(notifier)
        .with_cancel_flag(cancel);

    let report = match reconciler.sync(&loaded.document) {
        Ok(report) => report,
        Err(EnmasseError::Cancelled) => {
            eprintln!("error: import cancelled, no changes were committed");
            return Ok(EXIT_FAILURE);
        }
        Err(e) => return Err(e.to_string()),
    };

    if args.json {
        println!("{}", json_pretty(&report)?);
    } else {
        print_report(&report);
    }

    Ok(exit_code(&report))
}

fn print_report(report: &SyncReport) {
    for (object_type, counts) in &report.counts {
        println!(
            "{:<22} created {:>3}  updated {:>3}  deleted {:>3}  unchanged {:>3}  failed {:>3}",
            object_type.key(),
            counts.created,
            counts.updated,
            counts.deleted,
            counts.skipped,
            counts.failed
        );
    }
    for failure in &report.failures {
        println!(
            "failed: {} '{}' ({}): {}",
            failure.object_type, failure.name, failure.kind, failure.message
        );
    }
    println!("{}", report);
}

/// Maps a finished sync to the process exit code.
fn exit_code(report: &SyncReport) -> u8 {
    if report.is_success() {
        EXIT_SUCCESS
    } else if report.has_unresolved_references() {
        EXIT_OBJECT_NOT_FOUND
    } else {
        EXIT_PARTIAL
    }
}
