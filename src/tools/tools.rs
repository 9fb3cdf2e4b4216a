mod dump_namespaces;
use dump_namespaces::dump_namespaces;
mod dump_classes;
use dump_classes::dump_classes;
mod dump_instances;
use dump_instances::dump_instances;
mod query;
use query::query;

use std::path::PathBuf;

use anyhow::Result;
use cim::Cim;
use clap::{Parser, Subcommand};

/// Parse a CIM repository directory and dump its contents
#[derive(Clone, Debug, Parser)]
struct Args {
    /// directory containing INDEX.BTR, OBJECTS.DATA and MAPPING*.MAP
    #[arg(short, long)]
    input: PathBuf,
    // operation to execute
    #[command(subcommand)]
    operation: Operation,
}

#[derive(Clone, Debug, Subcommand)]
enum Operation {
    /// Dump the namespace tree
    DumpNamespaces,
    /// Dump all classes of a namespace
    DumpClasses(DumpClassesArgs),
    /// Dump all instances of a class
    DumpInstances(DumpInstancesArgs),
    /// Resolve an object path and dump the result
    Query(QueryArgs),
}

#[derive(Clone, Debug, Parser)]
struct DumpClassesArgs {
    /// namespace path, e.g. "root" or "root\cimv2"
    namespace: String,
}

#[derive(Clone, Debug, Parser)]
struct DumpInstancesArgs {
    /// namespace path, e.g. "root\subscription"
    namespace: String,
    /// class name, e.g. "__FilterToConsumerBinding"
    class: String,
}

#[derive(Clone, Debug, Parser)]
struct QueryArgs {
    /// object path, e.g. "//./root/cimv2:Win32_Service.Name='Beep'"
    path: String,
}

fn open_repository(args: &Args) -> Result<Cim> {
    Ok(Cim::from_directory(&args.input)?)
}

fn main() -> Result<()> {
    let args = Args::parse();

    match &args.operation {
        Operation::DumpNamespaces => dump_namespaces(&args),
        Operation::DumpClasses(classes_args) => dump_classes(&args, classes_args),
        Operation::DumpInstances(instances_args) => {
            dump_instances(&args, instances_args)
        }
        Operation::Query(query_args) => query(&args, query_args),
    }
}
