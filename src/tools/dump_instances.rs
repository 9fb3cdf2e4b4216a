use crate::{open_repository, Args, DumpInstancesArgs};

use anyhow::Result;

pub fn dump_instances(args: &Args, instances_args: &DumpInstancesArgs) -> Result<()> {
    let repo = open_repository(args)?;
    let namespace = repo.namespace(&instances_args.namespace);
    let class = namespace.class_(&instances_args.class)?;

    for instance in class.instances()? {
        let instance = instance?;
        println!("{}.{}", class.name()?, instance.key()?);
        for (name, prop) in instance.properties()? {
            match prop.value() {
                Some(value) => println!("  {name} = {value}"),
                None => println!("  {name} = <not initialized>"),
            }
        }
    }
    Ok(())
}
