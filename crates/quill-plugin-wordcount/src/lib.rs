//! Reference Quill plugin that counts and rewrites buffer text.
//!
//! Commands:
//!
//! - `word-count` puts the word count of the current buffer (or of the buffer
//!   named by its first argument) on the status line. It also runs after
//!   every save.
//! - `upcase-buffer` upper-cases the current buffer through a buffer proxy.
//! - `insert-text` inserts its arguments, joined by spaces, at point.
//!
//! The plugin also contributes the `word-count-mode` minor mode and binds
//! `C-c w` to `word-count`.

use quill_plugin_sdk::{
    BufferInfo, CommandSpec, HostClient, KeyBindingSpec, KeyScope, MinorModeSpec, Plugin,
    PluginFailure,
};
use tracing::debug;

const WORDCOUNT_TARGET: &str = "quill_plugin_wordcount";

/// Shows the current buffer's word count.
pub const WORD_COUNT: &str = "word-count";
/// Upper-cases the current buffer.
pub const UPCASE_BUFFER: &str = "upcase-buffer";
/// Inserts text at point.
pub const INSERT_TEXT: &str = "insert-text";
/// Minor mode contributed by the plugin.
pub const WORD_COUNT_MODE: &str = "word-count-mode";

const AFTER_SAVE: &str = "after-save";

const SNIPPETS: &[&str] = &["hello", "hello world", "lorem ipsum", "thanks"];

/// Counts whitespace-separated words.
#[must_use]
pub fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Status line text for a buffer.
#[must_use]
pub fn status_line(buffer: &BufferInfo) -> String {
    match count_words(&buffer.content) {
        1 => format!("{}: 1 word", buffer.name),
        count => format!("{}: {count} words", buffer.name),
    }
}

/// The word-count plugin.
#[derive(Debug, Default, Clone, Copy)]
pub struct WordCount;

impl WordCount {
    fn word_count(host: &HostClient, args: &[String]) -> Result<(), PluginFailure> {
        let buffer = args
            .first()
            .map_or_else(|| host.current_buffer(), |name| host.find_buffer(name))?
            .ok_or_else(|| PluginFailure::InvalidArguments {
                command: String::from(WORD_COUNT),
                message: String::from("no such buffer"),
            })?;
        host.set_status(&status_line(&buffer))?;
        Ok(())
    }

    fn upcase_buffer(host: &HostClient) -> Result<(), PluginFailure> {
        let mut buffer = host
            .current_buffer_proxy()?
            .ok_or_else(|| PluginFailure::Other(String::from("no current buffer")))?;
        let upper = buffer.content().to_uppercase();
        if upper != buffer.content() {
            buffer.set_content(upper)?;
        }
        Ok(())
    }

    fn insert_text(host: &HostClient, args: &[String]) -> Result<(), PluginFailure> {
        if args.is_empty() {
            return Err(PluginFailure::InvalidArguments {
                command: String::from(INSERT_TEXT),
                message: String::from("expected text to insert"),
            });
        }
        let mut buffer = host
            .current_buffer_proxy()?
            .ok_or_else(|| PluginFailure::Other(String::from("no current buffer")))?;
        let position = buffer.position();
        buffer.insert_at(position, args.join(" "))?;
        Ok(())
    }
}

impl Plugin for WordCount {
    fn name(&self) -> &str {
        "wordcount"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn description(&self) -> &str {
        "Counts words and rewrites buffer text"
    }

    fn initialize(&self, host: &HostClient) -> Result<(), PluginFailure> {
        host.add_hook(AFTER_SAVE, WORD_COUNT)?;
        debug!(target: WORDCOUNT_TARGET, "after-save hook registered");
        Ok(())
    }

    fn commands(&self) -> Vec<CommandSpec> {
        vec![
            CommandSpec::new(WORD_COUNT, "Show the word count of a buffer")
                .with_arg_spec("[buffer]"),
            CommandSpec::new(UPCASE_BUFFER, "Upper-case the current buffer"),
            CommandSpec::new(INSERT_TEXT, "Insert text at point").with_arg_spec("text..."),
        ]
    }

    fn minor_modes(&self) -> Vec<MinorModeSpec> {
        vec![MinorModeSpec::new(
            WORD_COUNT_MODE,
            "Show word counts in the mode line",
            " WC",
        )]
    }

    fn key_bindings(&self) -> Vec<KeyBindingSpec> {
        vec![KeyBindingSpec::new("C-c w", WORD_COUNT, KeyScope::Global)]
    }

    fn execute_command(
        &self,
        host: &HostClient,
        name: &str,
        args: &[String],
    ) -> Result<(), PluginFailure> {
        debug!(target: WORDCOUNT_TARGET, command = name, args = args.len(), "executing");
        match name {
            WORD_COUNT => Self::word_count(host, args),
            UPCASE_BUFFER => Self::upcase_buffer(host),
            INSERT_TEXT => Self::insert_text(host, args),
            other => Err(PluginFailure::UnknownCommand {
                name: other.to_owned(),
            }),
        }
    }

    fn completions(&self, command: &str, prefix: &str) -> Vec<String> {
        if command != INSERT_TEXT {
            return Vec::new();
        }
        SNIPPETS
            .iter()
            .filter(|snippet| snippet.starts_with(prefix))
            .map(|snippet| (*snippet).to_owned())
            .collect()
    }
}
