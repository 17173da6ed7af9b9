mod buffer;
mod catalog;
mod common;
mod errors;
mod index;
mod printer;
mod record;
mod storage;

use std::io::{BufRead, BufReader, BufWriter, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::{Context, Error, Result};
use buffer::buffer_manager::BufferManager;
use catalog::manager::{CatalogManager, ColDef};
use catalog::meta::ColType;
use clap::{Arg, Command, Parser};
use log::info;
use storage::disk_manager::DiskManager;

#[derive(Parser)]
struct ServerConfig {
    #[arg(long, help = "Directory under which database directories live")]
    data: String,

    #[arg(long, default_value_t = 42667)]
    port: u16,

    #[arg(long, default_value_t = 64, help = "Number of frames in the page cache")]
    pool_size: usize,
}

fn metacommand() -> Command {
    Command::new("siltdb")
        .subcommand_required(true)
        .disable_help_flag(true)
        .disable_help_subcommand(true)
        .help_template("{all-args}")
        .multicall(true)
        .subcommand(
            Command::new(".create_db")
                .arg(Arg::new("name").required(true))
                .about("Creates a database directory"),
        )
        .subcommand(
            Command::new(".drop_db")
                .arg(Arg::new("name").required(true))
                .about("Removes a database directory and all its files"),
        )
        .subcommand(
            Command::new(".open_db")
                .arg(Arg::new("name").required(true))
                .about("Opens a database"),
        )
        .subcommand(Command::new(".close_db").about("Closes the open database"))
        .subcommand(Command::new(".tables").about("Prints all tables of the open database"))
        .subcommand(
            Command::new(".indexes")
                .arg(Arg::new("table").required(true))
                .about("Prints all indexes of a table"),
        )
        .subcommand(
            Command::new(".desc")
                .arg(Arg::new("table").required(true))
                .about("Prints the columns of a table"),
        )
        .subcommand(
            Command::new(".create_table")
                .arg(Arg::new("name").required(true))
                .arg(Arg::new("columns").num_args(1..).required(true))
                .about("Creates a table; columns as name:type[:len], e.g. id:int title:char:32"),
        )
        .subcommand(
            Command::new(".drop_table")
                .arg(Arg::new("name").required(true))
                .about("Drops a table and its indexes"),
        )
        .subcommand(
            Command::new(".create_index")
                .arg(Arg::new("table").required(true))
                .arg(Arg::new("columns").num_args(1..).required(true))
                .about("Creates an index over the given columns"),
        )
        .subcommand(
            Command::new(".drop_index")
                .arg(Arg::new("table").required(true))
                .arg(Arg::new("columns").num_args(1..).required(true))
                .about("Drops the index over the given columns"),
        )
        .subcommand(Command::new(".exit").about("Closes the connection"))
}

fn parse_col_defs<'a>(specs: impl Iterator<Item = &'a String>) -> Result<Vec<ColDef>> {
    let mut col_defs = vec![];
    for spec in specs {
        let parts: Vec<&str> = spec.split(':').collect();
        let (name, col_type, len) = match parts.as_slice() {
            [name, type_name] => {
                let col_type: ColType = type_name.parse()?;
                let len = match col_type {
                    ColType::Int | ColType::Float => 4,
                    ColType::Char => {
                        return Err(Error::msg(format!(
                            "column {} needs an explicit length, e.g. {}:char:32",
                            name, name
                        )))
                    }
                };
                (name, col_type, len)
            }
            [name, type_name, len] => {
                let col_type: ColType = type_name.parse()?;
                let len = len
                    .parse::<i32>()
                    .with_context(|| format!("invalid length for column {}", name))?;
                (name, col_type, len)
            }
            _ => return Err(Error::msg(format!("malformed column spec {}", spec))),
        };
        col_defs.push(ColDef {
            name: (*name).to_owned(),
            col_type,
            len,
        });
    }
    Ok(col_defs)
}

fn column_args(matches: &clap::ArgMatches) -> Vec<String> {
    matches
        .get_many::<String>("columns")
        .unwrap()
        .cloned()
        .collect()
}

/// Handles one metacommand. Returns true if the command was .exit
fn handle_metacommand(
    writer: &mut BufWriter<&TcpStream>,
    command: &str,
    catalog: &Mutex<CatalogManager>,
) -> Result<bool> {
    let mut cmd = metacommand();

    let matches = match cmd.try_get_matches_from_mut(command.split_whitespace()) {
        Ok(matches) => matches,
        Err(e) => {
            writer.write_all(e.to_string().as_bytes())?;
            writer.write_all(format!("{}", cmd.render_help()).as_bytes())?;
            return Ok(false);
        }
    };

    let mut catalog = catalog.lock().unwrap();
    let result = match matches.subcommand() {
        Some((".create_db", matches)) => {
            let name = matches.get_one::<String>("name").unwrap();
            catalog.create_db(name).map(|()| "database created")
        }
        Some((".drop_db", matches)) => {
            let name = matches.get_one::<String>("name").unwrap();
            catalog.drop_db(name).map(|()| "database dropped")
        }
        Some((".open_db", matches)) => {
            let name = matches.get_one::<String>("name").unwrap();
            catalog.open_db(name).map(|()| "database opened")
        }
        Some((".close_db", _matches)) => catalog.close_db().map(|()| "database closed"),
        Some((".tables", _matches)) => {
            let mut out = Vec::new();
            catalog.show_tables(&mut out).map(|()| {
                writer.write_all(&out).ok();
                ""
            })
        }
        Some((".indexes", matches)) => {
            let table = matches.get_one::<String>("table").unwrap();
            let mut out = Vec::new();
            catalog.show_indexes(table, &mut out).map(|()| {
                writer.write_all(&out).ok();
                ""
            })
        }
        Some((".desc", matches)) => {
            let table = matches.get_one::<String>("table").unwrap();
            let mut out = Vec::new();
            catalog.desc_table(table, &mut out).map(|()| {
                writer.write_all(&out).ok();
                ""
            })
        }
        Some((".create_table", matches)) => {
            let name = matches.get_one::<String>("name").unwrap();
            let col_defs = parse_col_defs(matches.get_many::<String>("columns").unwrap())?;
            catalog.create_table(name, &col_defs).map(|()| "table created")
        }
        Some((".drop_table", matches)) => {
            let name = matches.get_one::<String>("name").unwrap();
            catalog.drop_table(name).map(|()| "table dropped")
        }
        Some((".create_index", matches)) => {
            let table = matches.get_one::<String>("table").unwrap();
            let columns = column_args(matches);
            catalog.create_index(table, &columns).map(|()| "index created")
        }
        Some((".drop_index", matches)) => {
            let table = matches.get_one::<String>("table").unwrap();
            let columns = column_args(matches);
            catalog.drop_index(table, &columns).map(|()| "index dropped")
        }
        Some((".exit", _matches)) => return Ok(true),
        _ => return Ok(false),
    };

    match result {
        Ok(message) => writer.write_all(message.as_bytes())?,
        Err(e) => writer.write_all(format!("Error: {}", e).as_bytes())?,
    }

    Ok(false)
}

fn handle_client(mut stream: TcpStream, catalog: &Mutex<CatalogManager>) -> Result<()> {
    stream.write_all("Welcome to siltdb".as_bytes())?;
    stream.write_all("\n> ".as_bytes())?;
    stream.flush()?;

    let mut reader = BufReader::new(&stream);
    let mut writer = BufWriter::new(&stream);
    let mut line = String::new();

    loop {
        line.clear();
        writer.flush()?;
        reader.read_line(&mut line)?;

        if line.as_bytes().is_empty() {
            // Client didn't send anything. Connection lost?
            return Ok(());
        }
        if !line.trim().is_empty() {
            if handle_metacommand(&mut writer, &line, catalog)? {
                break;
            }
        }
        writer.write_all("\n> ".as_bytes())?;
        writer.flush()?;
    }

    writer.flush()?;
    stream.shutdown(Shutdown::Both)?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let config = ServerConfig::parse();

    std::env::set_current_dir(&config.data)
        .with_context(|| format!("Could not enter data directory {}", config.data))?;

    let disk_manager = Arc::new(DiskManager::new());
    let buffer_manager = Arc::new(BufferManager::new(Arc::clone(&disk_manager), config.pool_size));
    let catalog = Mutex::new(CatalogManager::new(disk_manager, buffer_manager));

    let listener = TcpListener::bind(("localhost", config.port))?;
    info!("listening on port {}", config.port);

    thread::scope(|scope| {
        let catalog = &catalog;

        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    scope.spawn(move || match handle_client(stream, catalog) {
                        Ok(()) => (),
                        Err(e) => println!("Failed to handle client. Cause: {e}"),
                    });
                }
                Err(e) => println!("Could not get tcp stream: {e}"),
            }
        }
    });

    Ok(())
}
