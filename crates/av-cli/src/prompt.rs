use std::io::Write;

use async_trait::async_trait;
use av_pipeline::Prompter;

/// Real operator-interaction surface for manual mode (§4.2): writes the prompt to stdout and
/// blocks on a line of stdin. `tokio::task::spawn_blocking` keeps the blocking read off the
/// async executor.
pub struct StdinPrompter;

#[async_trait]
impl Prompter for StdinPrompter {
    async fn prompt(&self, message: &str) -> String {
        let message = message.to_string();
        tokio::task::spawn_blocking(move || {
            print!("{message}");
            let _ = std::io::stdout().flush();
            let mut line = String::new();
            match std::io::stdin().read_line(&mut line) {
                Ok(_) => line.trim_end_matches(['\r', '\n']).to_string(),
                Err(_) => String::new(),
            }
        })
        .await
        .unwrap_or_default()
    }
}
