//! Process-wide logging setup: a combined terminal + file logger built from
//! `simplelog`, with a timestamped log file under `logs/`. The terminal
//! level widens to `Info` only when `verbose` is false; the orchestrator's
//! own crash/death handling owns shutdown, so there's no early-exit spawn
//! here.
pub fn init(verbose: bool) {
    let config = simplelog::ConfigBuilder::new()
        .set_location_level(log::LevelFilter::Off)
        .set_target_level(log::LevelFilter::Off)
        .set_thread_level(log::LevelFilter::Off)
        .build();

    std::fs::create_dir_all("logs").ok();
    let time = crate::model::now_epoch_secs();
    let file_level = log::LevelFilter::Debug;
    let term_level = if verbose { log::LevelFilter::Debug } else { log::LevelFilter::Info };

    let mut loggers: Vec<Box<dyn simplelog::SharedLogger>> = vec![simplelog::TermLogger::new(
        term_level,
        config.clone(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )];

    if let Ok(file) = std::fs::File::create(format!("logs/{time}.log")) {
        loggers.push(simplelog::WriteLogger::new(file_level, config, file));
    }

    if simplelog::CombinedLogger::init(loggers).is_err() {
        // A logger is already installed (e.g. repeated test init); ignore.
    }
}
