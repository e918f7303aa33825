//! Binary entrypoint for the word-count plugin.

use std::io::{self, Write};

use quill_plugin_wordcount::WordCount;

fn main() {
    if let Err(error) = quill_plugin_sdk::serve(WordCount) {
        writeln!(io::stderr().lock(), "{error}").ok();
        std::process::exit(1);
    }
}
