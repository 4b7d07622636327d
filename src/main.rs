use std::path::PathBuf;

use anyhow::Context;
use itertools::Itertools;
use rustyline::{error::ReadlineError, Editor};
use structopt::StructOpt;

use gridlog::{parse_program, QueryAnswer, RecordingBackend, Theory};

#[derive(StructOpt)]
#[structopt(
    name = "gridlog",
    about = "Compiles rule theories for an external fixed-point solver"
)]
struct Opt {
    /// Theory files, concatenated in order.
    #[structopt(parse(from_os_str))]
    theories: Vec<PathBuf>,

    /// Queries to run instead of the interactive prompt.
    #[structopt(short, long)]
    query: Vec<String>,

    /// Print the compiled relations, facts and assertions.
    #[structopt(short, long)]
    debug: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opt = Opt::from_args();

    let mut code = String::new();
    for path in &opt.theories {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        code.push_str(&text);
        code.push('\n');
    }
    let program = parse_program(&code)?;
    let mut theory = Theory::new(program, RecordingBackend::new())?;

    if opt.debug {
        dump(theory.backend());
    }

    if opt.query.is_empty() {
        repl(&mut theory);
    } else {
        for query in &opt.query {
            report(&mut theory, query);
        }
    }
    Ok(())
}

fn repl(theory: &mut Theory<RecordingBackend>) {
    let mut editor = Editor::<()>::new();
    loop {
        match editor.readline("?- ") {
            Ok(line) => {
                editor.add_history_entry(line.as_str());
                report(theory, &line);
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => {
                println!("Error: {}", err);
                break;
            }
        }
    }
}

fn report(theory: &mut Theory<RecordingBackend>, code: &str) {
    match answer(theory, code) {
        Ok(text) => println!("{}", text),
        Err(e) => println!("Error: {}", e),
    }
}

fn answer(theory: &mut Theory<RecordingBackend>, code: &str) -> gridlog::Result<String> {
    let (names, result) = theory.query(code)?;
    let mut out = String::new();
    if let Some(goal) = theory.backend().queries.last() {
        out.push_str(&format!("compiled: {}\n", goal));
    }
    match result {
        QueryAnswer::Bool(b) => out.push_str(&b.to_string()),
        QueryAnswer::Rows(rows) => {
            out.push_str(&names.join("\t"));
            for row in rows {
                out.push('\n');
                out.push_str(&row.iter().map(ToString::to_string).join("\t"));
            }
        }
    }
    Ok(out)
}

fn dump(backend: &RecordingBackend) {
    for (name, sorts) in &backend.relations {
        println!(
            "relation {} ({})",
            name,
            sorts.iter().map(ToString::to_string).join(" ")
        );
    }
    for (table, row) in &backend.facts {
        println!(
            "fact {}({})",
            table,
            row.iter().map(ToString::to_string).join(", ")
        );
    }
    for rule in &backend.rules {
        println!("assert {}", rule);
    }
}
