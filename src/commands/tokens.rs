use anyhow::Result;

use crate::Context;
use crate::cli::ExtractTokensArgs;
use crate::engine::tokens::{TokenExtractor, mask_key};
use crate::ui;

pub fn run(ctx: &Context, args: ExtractTokensArgs) -> Result<bool> {
    let token = args.admin_token.as_deref().or(ctx.api.token.as_deref());
    let settings = ctx.settings_with(token, "AUTHENTIK_ADMIN_TOKEN")?;
    let (catalog, _) = ctx.catalog()?;
    let client = ctx.client(&settings);

    let extractor = TokenExtractor::new(&client, catalog.outpost.exclude_name_patterns.clone());
    let result = extractor.extract(&args.targets)?;
    result.write(&args.output)?;

    if !ctx.quiet {
        ui::header("Extracted Outpost Tokens");
        for (id, entry) in &result.extracted_tokens {
            ui::kv(&entry.expected_name, &format!("{id} {}", mask_key(&entry.token)));
        }
        println!();
    }
    ui::success(&format!(
        "Wrote {} token(s) to {}",
        result.extracted_tokens.len(),
        args.output.display()
    ));
    Ok(true)
}
