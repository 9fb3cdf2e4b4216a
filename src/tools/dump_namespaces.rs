use crate::{open_repository, Args};

use anyhow::Result;
use cim::Namespace;

pub fn dump_namespaces(args: &Args) -> Result<()> {
    let repo = open_repository(args)?;
    print_tree(&repo.root(), 0)?;
    Ok(())
}

fn print_tree(namespace: &Namespace<'_>, depth: usize) -> Result<()> {
    println!("{:indent$}{}", "", namespace.name, indent = depth * 2);
    for child in namespace.namespaces()? {
        print_tree(&child?, depth + 1)?;
    }
    Ok(())
}
