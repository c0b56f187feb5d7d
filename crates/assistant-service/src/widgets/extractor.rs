use super::{WidgetContext, WidgetRenderer, WIDGET_FAILED, WIDGET_SUFFIX};
use crate::session::SessionParams;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::warn;

lazy_static! {
    static ref TAG_RE: Regex = Regex::new(r"(?s)\s*<!.+?[!/]>\s*").unwrap();
}

const TAG_OPEN: &str = "<!";
const TAG_CLOSERS: [&str; 2] = ["!>", "/>"];

fn is_balanced(text: &str) -> bool {
    let closers: usize = TAG_CLOSERS.iter().map(|c| text.matches(c).count()).sum();
    text.matches(TAG_OPEN).count() == closers
}

/// Holds back streamed text while a widget tag is incomplete, then swaps
/// every complete tag for its rendered token.
///
/// Completeness is judged by counting tag openers against closers, so the
/// client never sees partial tag syntax.
#[derive(Debug, Default)]
pub struct WidgetExtractor {
    buffer: String,
    trim_next: bool,
}

impl WidgetExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept one chunk. Returns the text that is safe to process, or `None`
    /// while a tag is still open.
    pub fn accept(&mut self, chunk: &str) -> Option<String> {
        self.buffer.push_str(chunk);
        if !is_balanced(&self.buffer) {
            return None;
        }
        let mut ready = std::mem::take(&mut self.buffer);
        // A trailing '<' may be the first half of an opener.
        if ready.ends_with('<') {
            ready.pop();
            self.buffer.push('<');
        }
        if ready.is_empty() {
            return None;
        }
        Some(ready)
    }

    /// Accept one chunk and return what should be forwarded to the client,
    /// with widgets rendered. `None` means nothing to send yet.
    pub async fn feed(
        &mut self,
        chunk: &str,
        renderer: &dyn WidgetRenderer,
        params: &SessionParams,
        context: &WidgetContext,
    ) -> Option<String> {
        let ready = self.accept(chunk)?;
        if ready.trim().is_empty() {
            return None;
        }

        let mut output = String::with_capacity(ready.len());
        let mut last = 0;
        for tag in TAG_RE.find_iter(&ready) {
            output.push_str(&ready[last..tag.start()]);
            let replacement = match renderer.render(tag.as_str().trim(), params, context).await {
                Ok(widget) => widget.to_token().unwrap_or_else(|e| {
                    warn!("marshal widget failed: {}", e);
                    WIDGET_FAILED.to_string()
                }),
                Err(e) => {
                    warn!("process widget failed: {}", e);
                    WIDGET_FAILED.to_string()
                }
            };
            output.push_str(&replacement);
            last = tag.end();
        }
        output.push_str(&ready[last..]);

        // Whitespace the model puts after a widget is dropped.
        if self.trim_next {
            output = output.trim_start().to_string();
        }
        if output.trim().is_empty() {
            return None;
        }
        self.trim_next = output.ends_with(WIDGET_SUFFIX);
        Some(output)
    }

    /// Text still held back when the stream ended; an unterminated tag.
    pub fn finish(&mut self) -> Option<String> {
        self.trim_next = false;
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }
}
