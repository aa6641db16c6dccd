use moodleware_core::config::{expand_path, Config};
use moodleware_core::proxy::RouteTable;

pub fn run(config: &Config) -> anyhow::Result<()> {
    let path = expand_path(&config.moodle.endpoints_file);
    let table = RouteTable::load(&path)?;

    println!("{} proxied functions from {:?}", table.len(), path);
    println!();
    for route in table.routes() {
        println!("{:<7} {:<45} -> {} ({})", route.method.as_str(), route.path, route.endpoint, route.function);
        for param in &route.params {
            let required = if param.required { " (required)" } else { "" };
            println!("          {}: {}{}", param.name, String::from(param.param_type), required);
        }
    }

    Ok(())
}
