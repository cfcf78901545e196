use std::fmt::Write as _;
use std::path::Path;

use anyhow::Result;
use dialoguer::console;
use serde_json::json;

use crate::config;
use crate::ui::listing_table;

pub fn run(path: &Path, json: bool) -> Result<()> {
    let cfg = config::load_file(path)?;

    if json {
        let names: Vec<&String> = cfg.aliases.keys().collect();
        println!("{}", serde_json::to_string(&names)?);
        return Ok(());
    }

    let mut output = String::new();
    writeln!(
        output,
        "{} aliases found in {}\n",
        console::style(cfg.aliases.len()),
        console::style(path.display()).bold()
    )?;

    let mut table = listing_table(&["Name", "URL"], 6);
    for (name, alias) in &cfg.aliases {
        table.add_row(vec![name, &alias.url]);
    }
    write!(output, "{table}")?;
    println!("{output}");
    Ok(())
}

pub fn show(path: &Path, name: &str, full: bool, json: bool) -> Result<()> {
    let alias = config::get_alias(path, name)?;
    let token = if full {
        alias.token.clone()
    } else {
        mask_token(&alias.token)
    };

    if json {
        println!(
            "{}",
            serde_json::to_string(&json!({ "name": name, "url": alias.url, "token": token }))?
        );
    } else {
        println!("{}:\t{}", console::style("URL").bold(), alias.url);
        println!("{}:\t{}", console::style("Token").bold(), token);
    }
    Ok(())
}

fn mask_token(token: &str) -> String {
    match token.chars().count() {
        0 => "-".to_string(),
        n if n <= 8 => "*".repeat(8),
        _ => format!("{}{}", token.chars().take(4).collect::<String>(), "*".repeat(8)),
    }
}
