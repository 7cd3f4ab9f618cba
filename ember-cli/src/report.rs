use ariadne::{Color, Label, Report, ReportKind, Source};
use ember::EmberError;
use std::io::Write;
use std::ops::Range;

/// Converts a byte span to a character span for ariadne
fn byte_to_char_span(source: &str, byte_span: &Range<usize>) -> Range<usize> {
    let end = byte_span.end.min(source.len());
    let start = byte_span.start.min(end);
    let start = source[..start].chars().count();
    let end = source[..end].chars().count();
    start..end
}

fn label_color(error: &EmberError) -> Color {
    match error {
        EmberError::Runtime { .. } => Color::Magenta,
        _ => Color::Red,
    }
}

/// Renders an error with its source span underlined. Errors without a
/// location are written as plain text.
pub fn report_error<W: Write>(
    error: &EmberError,
    source: &str,
    filename: Option<&str>,
    mut writer: W,
) {
    let name = filename.unwrap_or("");

    let Some(span) = error.span() else {
        writeln!(writer, "{}", error).ok();
        return;
    };

    let char_span = byte_to_char_span(source, &span);
    Report::build(ReportKind::Error, (name, char_span.clone()))
        .with_message(error.to_string())
        .with_label(
            Label::new((name, char_span))
                .with_message(error.message())
                .with_color(label_color(error)),
        )
        .finish()
        .write((name, Source::from(source)), &mut writer)
        .ok();
}
