//! Embedded control page, served gzip-encoded from `/`.
//!
//! The page loads fully before any stream starts; JavaScript attaches the
//! MJPEG stream afterwards so the initial page load never blocks on it.

use anyhow::{Context, Result};
use libflate::gzip::Encoder;
use std::io::Write;
use std::sync::OnceLock;

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>camserve</title>
<style>
body { font-family: sans-serif; margin: 1rem; background: #181818; color: #ddd; }
img { max-width: 100%; background: #000; }
fieldset { border: 1px solid #444; margin-top: 1rem; }
label { margin-right: 1rem; }
</style>
</head>
<body>
<h1>camserve</h1>
<img id="view" alt="camera stream">
<fieldset>
<legend>Controls</legend>
<label>Frame size
<select id="framesize">
<option value="qvga">QVGA</option>
<option value="vga">VGA</option>
<option value="svga" selected>SVGA</option>
<option value="hd">HD</option>
<option value="fhd">FHD</option>
</select></label>
<label>Quality <input id="quality" type="number" min="5" max="63" value="12"></label>
<label>Delay ms <input id="stream_delay" type="number" min="0" max="500" value="33"></label>
<label>Flip <input id="vflip" type="checkbox"></label>
<label>Mirror <input id="hmirror" type="checkbox"></label>
<button id="snap">Capture</button>
</fieldset>
<script>
function control(name, value) {
  fetch('/control?var=' + name + '&val=' + value);
}
for (const id of ['framesize', 'quality', 'stream_delay']) {
  document.getElementById(id).addEventListener('change', e => control(id, e.target.value));
}
for (const id of ['vflip', 'hmirror']) {
  document.getElementById(id).addEventListener('change', e => control(id, e.target.checked ? 1 : 0));
}
document.getElementById('snap').addEventListener('click', () => {
  window.open('/capture', '_blank');
});
fetch('/status').then(r => r.json()).then(s => {
  document.getElementById('quality').value = s.quality;
  document.getElementById('stream_delay').value = s.stream_delay;
  document.getElementById('vflip').checked = !!s.vflip;
  document.getElementById('hmirror').checked = !!s.hmirror;
});
window.addEventListener('load', () => {
  document.getElementById('view').src = '/stream';
});
</script>
</body>
</html>
"#;

static GZIPPED_INDEX: OnceLock<Vec<u8>> = OnceLock::new();

/// The UI page, gzip-compressed once per process.
pub fn gzipped_index() -> Result<&'static [u8]> {
    if let Some(bytes) = GZIPPED_INDEX.get() {
        return Ok(bytes);
    }
    let mut encoder = Encoder::new(Vec::new()).context("create gzip encoder")?;
    encoder
        .write_all(INDEX_HTML.as_bytes())
        .context("compress ui page")?;
    let compressed = encoder
        .finish()
        .into_result()
        .context("finish ui compression")?;
    Ok(GZIPPED_INDEX.get_or_init(|| compressed))
}
