use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use aloft::{NetworkPeerConfig, Peer};
use aloft_admin::Cli;
use aloft_base::Result;
use aloft_eval::{Interpreter, Thread, Value};
use aloft_lang::{LangInterpreter, ListObject};

fn main() {
    aloft_admin::init_tracing();
    let cli = Cli::parse();
    if let Err(e) = cli.validate() {
        eprintln!("{e}");
        std::process::exit(1);
    }
    if let Err(e) = run(&cli) {
        eprintln!("{e:?}");
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    let interpreter: Arc<dyn Interpreter> = Arc::new(LangInterpreter::new());
    let peer = if cli.standalone {
        Peer::standalone(interpreter)
    } else {
        let config = NetworkPeerConfig::try_from(cli)?;
        Peer::networked(config, interpreter)?
    };

    match &cli.program {
        Some(path) => run_demo_program(&peer, path),
        None if cli.standalone => Ok(()),
        // No program given on a network peer: stay up and keep serving
        // replication traffic for whoever dials in.
        None => loop {
            std::thread::sleep(Duration::from_secs(3600));
        },
    }
}

/// `aloft-lang` exists to exercise the three demo object kinds through
/// `call_method`, not to parse a scripting language -- there is no parser
/// here, `--program` just names the run for the log. What actually runs is
/// a fixed smoke sequence: append a fresh marker object to a shared,
/// named list and report its new length.
fn run_demo_program(peer: &Peer, path: &Path) -> Result<()> {
    let program_name = path.display().to_string();
    let root = peer.engine().create_object(Box::new(ListObject::new(Vec::new())), "program_root", true);
    let marker = peer.engine().create_object(Box::new(ListObject::new(Vec::new())), "", true);

    peer.run_program(&root, "append", &[Value::Object { value: marker, local_type: 0 }], true)?;
    let length = peer.run_program(&root, "length", &[], false)?;
    info!(target: "aloft", "ran program {program_name}; program_root now has length {length:?}");
    Ok(())
}
