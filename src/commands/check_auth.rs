use anyhow::Result;

use crate::Context;
use crate::engine;
use crate::ui;

pub fn run(ctx: &Context) -> Result<bool> {
    let settings = ctx.settings()?;
    let client = ctx.client(&settings);

    match engine::authenticate(&client) {
        Ok(user) => {
            if !ctx.quiet {
                ui::header("Authentication");
                ui::kv("Host", &settings.host);
                ui::kv("User", &user.username);
                if !user.name.is_empty() && user.name != user.username {
                    ui::kv("Name", &user.name);
                }
                ui::kv("Id", &user.pk.to_string());
                println!();
                ui::success(&format!("Token accepted by {}", settings.host));
            }
            Ok(true)
        }
        Err(e) => {
            ui::error(&format!("Token rejected by {}", settings.host));
            ui::dim(e.category().advice());
            Ok(false)
        }
    }
}
