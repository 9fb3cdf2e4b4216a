use crate::{open_repository, Args, QueryArgs};

use anyhow::Result;
use cim::QueryResult;

pub fn query(args: &Args, query_args: &QueryArgs) -> Result<()> {
    let repo = open_repository(args)?;

    match repo.query(&query_args.path, None)? {
        QueryResult::Namespace(namespace) => {
            println!("namespace {}", namespace.name);
        }
        QueryResult::Class(class) => {
            println!("class {}", class.name()?);
            for (name, prop) in class.properties()? {
                println!("  {:28} {:?}", name, prop.value_type());
            }
        }
        QueryResult::Instance(instance) => {
            println!("instance {}.{}", instance.name()?, instance.key()?);
            for (name, prop) in instance.properties()? {
                match prop.value() {
                    Some(value) => println!("  {name} = {value}"),
                    None => println!("  {name} = <not initialized>"),
                }
            }
        }
    }
    Ok(())
}
