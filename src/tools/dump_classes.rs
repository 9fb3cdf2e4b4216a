use crate::{open_repository, Args, DumpClassesArgs};

use anyhow::Result;

pub fn dump_classes(args: &Args, classes_args: &DumpClassesArgs) -> Result<()> {
    let repo = open_repository(args)?;
    let namespace = repo.namespace(&classes_args.namespace);

    for class in namespace.classes()? {
        let class = class?;
        let definition = class.definition();
        println!("{}", class.name()?);
        if !definition.super_class_name.is_empty() {
            println!("  super: {}", definition.super_class_name);
        }
        for (name, prop) in class.properties()? {
            println!("  {:28} {:?}", name, prop.value_type());
        }
    }
    Ok(())
}
