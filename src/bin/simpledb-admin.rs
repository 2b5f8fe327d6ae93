use std::{error::Error, path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand};
use log::info;

use simpledb_engine::{
    DbConfig, FieldType, FileManager, LogManager, LogRecord, SimpleDB, Transaction,
};

/// Offline administration of a database directory
#[derive(Parser, Debug)]
#[command(name = "simpledb-admin", version, about)]
struct Cli {
    /// Database directory
    #[arg(short, long, default_value = "./simpledb-data")]
    dir: PathBuf,

    /// Block size the database was created with
    #[arg(short, long, default_value_t = DbConfig::DEFAULT_BLOCK_SIZE)]
    block_size: usize,

    /// Number of buffers in the pool
    #[arg(long, default_value_t = DbConfig::DEFAULT_BUFFER_POOL_SIZE)]
    buffers: usize,

    /// Name of the log file inside the directory
    #[arg(long, default_value = DbConfig::DEFAULT_LOG_FILE_NAME)]
    log_file: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open the database, which rolls back every unfinished transaction
    Recover,
    /// Print every log record, newest first, without recovering
    Log,
    /// List the tables in the catalog
    Tables,
    /// Show the fields, statistics and indexes of a table
    Describe { table: String },
    /// Show the statistics of a table
    Stats { table: String },
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let config = DbConfig::new(&cli.dir)
        .with_block_size(cli.block_size)
        .with_buffer_pool_size(cli.buffers)
        .with_log_file_name(&cli.log_file);

    match &cli.command {
        Command::Log => dump_log(&config),
        Command::Recover => {
            SimpleDB::open(config)?;
            println!("Database recovery completed successfully.");
            Ok(())
        }
        Command::Tables => with_tx(&config, |db, txn| {
            let tables = db.metadata_manager().get_table_names(txn)?;
            if tables.is_empty() {
                println!("No tables found.");
            } else {
                println!("Tables:");
                for table in tables {
                    println!("  - {table}");
                }
            }
            Ok(())
        }),
        Command::Describe { table } => with_tx(&config, |db, txn| describe_table(db, txn, table)),
        Command::Stats { table } => with_tx(&config, |db, txn| {
            let mdm = db.metadata_manager();
            let layout = mdm.get_layout(table, txn)?;
            let stat_info = mdm.get_stat_info(table, &layout, txn)?;
            println!("Table: {table}");
            println!("  Blocks: {}", stat_info.blocks_accessed());
            println!("  Records: {}", stat_info.records_output());
            for field in &layout.schema.fields {
                println!(
                    "  Distinct {field}: ~{}",
                    stat_info.distinct_values(field)
                );
            }
            Ok(())
        }),
    }
}

/// Run a read-only command inside one transaction that is always committed
fn with_tx<F>(config: &DbConfig, f: F) -> Result<(), Box<dyn Error>>
where
    F: FnOnce(&SimpleDB, &Arc<Transaction>) -> simpledb_engine::Result<()>,
{
    let db = SimpleDB::open(config.clone())?;
    let txn = db.new_tx()?;
    match f(&db, &txn) {
        Ok(()) => {
            txn.commit()?;
            Ok(())
        }
        Err(e) => {
            txn.rollback()?;
            Err(e.into())
        }
    }
}

fn dump_log(config: &DbConfig) -> Result<(), Box<dyn Error>> {
    config.validate()?;
    let file_manager = Arc::new(FileManager::new(&config.db_directory, config.block_size)?);
    let log_manager = LogManager::new(Arc::clone(&file_manager), &config.log_file_name)?;
    info!("reading {} newest first", log_manager.log_file());
    let mut count = 0;
    for bytes in log_manager.iterator()? {
        match LogRecord::from_bytes(&bytes?) {
            Ok(record) => println!("{record}"),
            Err(e) => println!("<unreadable record: {e}>"),
        }
        count += 1;
    }
    println!("{count} records");
    Ok(())
}

fn describe_table(
    db: &SimpleDB,
    txn: &Arc<Transaction>,
    table_name: &str,
) -> simpledb_engine::Result<()> {
    let mdm = db.metadata_manager();
    let layout = mdm.get_layout(table_name, txn)?;
    let stat_info = mdm.get_stat_info(table_name, &layout, txn)?;
    let indexes = mdm.get_index_info(table_name, txn)?;

    println!("Table: {table_name}");
    println!("Slot Size: {} bytes", layout.slot_size);
    println!(
        "Statistics: {} blocks, {} records",
        stat_info.num_blocks, stat_info.num_records
    );
    println!();
    println!("Fields:");
    println!("{:<20} {:<15} {:<8}", "Name", "Type", "Offset");
    println!("{}", "-".repeat(43));
    for field in &layout.schema.fields {
        let info = layout.schema.field_info(field)?;
        let type_str = match info.field_type {
            FieldType::Int => FieldType::Int.name().to_string(),
            FieldType::String => format!("{}({})", FieldType::String.name(), info.length),
        };
        println!("{field:<20} {type_str:<15} {:<8}", layout.offset(field)?);
    }

    if !indexes.is_empty() {
        println!();
        println!("Indexes:");
        let mut indexes: Vec<_> = indexes.values().collect();
        indexes.sort_by(|a, b| a.index_name().cmp(b.index_name()));
        for index in indexes {
            println!(
                "  {} on {} (~{} blocks per lookup, ~{} rows per key)",
                index.index_name(),
                index.field_name(),
                index.blocks_accessed(),
                index.records_output()
            );
        }
    }
    Ok(())
}
