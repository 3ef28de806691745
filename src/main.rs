fn main() {
    let args = std::env::args();

    if let Err(err) = drivemirror::run(args) {
        if matches!(
            err.downcast_ref::<drivemirror::Error>(),
            Some(drivemirror::Error::Interrupted)
        ) {
            eprintln!("drivemirror: interrupted");
            std::process::exit(130);
        }
        // Logging may not be up if argument parsing failed; stderr always works.
        drivemirror::logging::init_logging(drivemirror::logging::LogFormat::Human);
        eprintln!("drivemirror error: {err:#}");
        std::process::exit(1);
    }
}
