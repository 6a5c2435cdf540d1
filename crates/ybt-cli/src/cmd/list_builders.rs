use anyhow::Result;
use clap::Parser;

/// List every registered builder along with its docstring (spec §9
/// supplement: `list-builders`).
#[derive(Debug, Parser)]
pub struct ListBuilders;

impl ListBuilders {
    pub fn run(self) -> Result<()> {
        let registry = super::builder_registry()?;
        let mut names: Vec<&str> = registry.names().collect();
        names.sort();
        for name in names {
            let doc = registry.docstring(name).unwrap_or("");
            let cachable = if registry.is_cachable(name) { "cachable" } else { "not cachable" };
            println!("{name} ({cachable})\n    {doc}");
        }
        Ok(())
    }
}
