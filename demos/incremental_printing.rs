use std::io::stdout;
use std::process::exit;
use std::thread::sleep;
use std::time::Duration;

use anyhow::Result;
use termimad::crossterm::{cursor, ExecutableCommand};

use promptbook::decoding::{AttentionMask, CausalLm, IncrementalDecoder, Logits, TokenId, Tokenizer};
use promptbook::utils::printing::{print_decode_steps, IncrementalMarkdownPrinter};
use promptbook::utils::token::tiktoken::Tiktoken;

const PROMPT: &str = "Say hello in markdown.";

const MARKDOWN_TEXT: &str = r#"
# Hello

This is inline code `print("hello")`.

A super long line to "tttttttttttttttttttttttttttttttttttttttttttttttttttttttttttttttttest" the hard wrapping.

```python
print("hello")
```

Here ends it."#;

/// A model that has memorized one answer and replays it token by token, slowly.
struct ReplayLm {
    answer: Vec<TokenId>,
    vocab_size: usize,
}

impl CausalLm for ReplayLm {
    /// Number of answer tokens produced so far.
    type Cache = usize;

    fn forward(&self, _input_ids: &[TokenId], _mask: &AttentionMask, cache: Option<usize>) -> Result<(Logits, usize)> {
        let produced = cache.map_or(0, |c| c + 1);
        let mut logits = vec![0.0; self.vocab_size];
        if let Some(&next) = self.answer.get(produced) {
            logits[next as usize] = 1.0;
        }
        sleep(Duration::from_millis(50));
        Ok((logits, produced))
    }
}

fn main() -> Result<()> {
    env_logger::init();
    ctrlc::set_handler(move || {
        // to avoid missing cursor when Ctrl-C is pressed
        let _ = stdout().execute(cursor::Show);
        exit(0);
    })?;
    let tokenizer = Tiktoken::new("gpt-3.5-turbo")?;
    let answer = tokenizer.encode(MARKDOWN_TEXT)?.ids;
    let vocab_size = answer.iter().max().map_or(0, |&id| id as usize + 1);
    let model = ReplayLm { answer, vocab_size };
    let decoder = IncrementalDecoder::new(&model, &tokenizer);

    let mut printer = IncrementalMarkdownPrinter::default();
    printer.activate(true)?;
    let steps = decoder.steps(PROMPT, model.answer.len())?;
    let generated = print_decode_steps(&mut printer, steps)?;
    printer.deactivate()?;
    assert_eq!(MARKDOWN_TEXT, generated);
    Ok(())
}
