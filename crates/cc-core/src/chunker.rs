use crate::types::Chunk;

/// Splits a file into overlapping line windows for the vector index.
pub fn chunk_file(path: &str, content: &str, window: usize, overlap: usize) -> Vec<Chunk> {
    let lines: Vec<&str> = content.lines().collect();
    if lines.is_empty() || window == 0 {
        return Vec::new();
    }
    let step = window.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < lines.len() {
        let end = (start + window).min(lines.len());
        chunks.push(Chunk {
            path: path.to_string(),
            start_line: line_number(start),
            end_line: line_number(end - 1),
            text: lines[start..end].join("\n"),
        });
        if end == lines.len() {
            break;
        }
        start += step;
    }
    chunks
}

fn line_number(index: usize) -> u32 {
    u32::try_from(index + 1).unwrap_or(u32::MAX)
}
