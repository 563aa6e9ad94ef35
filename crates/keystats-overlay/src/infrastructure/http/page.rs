//! The overlay page served at `/`.
//!
//! The page is regenerated per request so it always reflects the active
//! layout.  Keys are embedded as a JSON array of `{l, vk, r, c, w, h}`
//! objects; the script positions them with the same geometry formula the
//! core uses and highlights held keys from the event stream.

use serde::Serialize;

use keystats_core::{DisplayMetrics, KeyCode, KeyLayout};

/// Colors and font for the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageStyle {
    pub background_color: String,
    pub key_color: String,
    pub key_active_color: String,
    pub font_family: String,
}

impl Default for PageStyle {
    fn default() -> Self {
        Self {
            background_color: "#282828".to_string(),
            key_color: "#444444".to_string(),
            key_active_color: "#0096FF".to_string(),
            font_family: "monospace".to_string(),
        }
    }
}

#[derive(Serialize)]
struct PageKey<'a> {
    l: &'a str,
    vk: KeyCode,
    r: f64,
    c: f64,
    w: f64,
    h: f64,
}

/// Serializes the layout for embedding inside a `<script>` element.
fn keys_json(layout: &KeyLayout) -> String {
    let keys: Vec<PageKey<'_>> = layout
        .keys()
        .map(|k| PageKey {
            l: &k.label,
            vk: k.code,
            r: k.row,
            c: k.col,
            w: k.width,
            h: k.height,
        })
        .collect();
    // A label containing "</script>" must not end the element.
    serde_json::to_string(&keys)
        .unwrap_or_else(|_| "[]".to_string())
        .replace("</", "<\\/")
}

/// Renders the page for `layout`.
///
/// `fallback` metrics apply unless the layout carries its own.
pub fn render_page(layout: &KeyLayout, fallback: DisplayMetrics, style: &PageStyle) -> String {
    let metrics = layout.effective_metrics(fallback);
    let (width, height) = layout.bounds(&metrics);
    let keys = keys_json(layout);

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <title>Key Stats</title>
    <style>
        body {{ background: transparent; margin: 0; padding: 10px; font-family: {font}; }}
        .keyboard {{
            position: relative;
            width: {width}px;
            height: {height}px;
            background: {background};
        }}
        .key {{
            position: absolute;
            background: {key_color};
            border: 1px solid #555;
            border-radius: 4px;
            padding: 4px;
            text-align: center;
            color: #fff;
            font-size: 11px;
            display: flex;
            align-items: center;
            justify-content: center;
            box-sizing: border-box;
            transition: background 0.1s;
        }}
        .key.pressed {{ background: {active_color}; }}
        .stats {{ color: #0f0; font-size: 14px; margin-bottom: 10px; }}
    </style>
</head>
<body>
    <div class="stats">
        <span id="kps">KPS: 0</span> |
        <span id="total">Total: 0</span>
    </div>
    <div class="keyboard" id="keyboard"></div>
    <script>
        const unitWidth = {unit_width};
        const unitHeight = {unit_height};
        const keySpacing = {spacing};
        const keys = {keys};

        function renderKeyboard() {{
            const kb = document.getElementById('keyboard');
            keys.forEach(k => {{
                const el = document.createElement('div');
                el.className = 'key';
                el.style.left = (k.c * (unitWidth + keySpacing)) + 'px';
                el.style.top = (k.r * (unitHeight + keySpacing)) + 'px';
                el.style.width = (k.w * unitWidth + (k.w - 1) * keySpacing) + 'px';
                el.style.height = (k.h * unitHeight + (k.h - 1) * keySpacing) + 'px';
                el.textContent = k.l;
                el.dataset.vk = k.vk;
                kb.appendChild(el);
            }});
        }}

        function update(data) {{
            const pressed = new Set(data.pressed || []);
            document.querySelectorAll('.key').forEach(el => {{
                el.classList.toggle('pressed', pressed.has(parseInt(el.dataset.vk, 10)));
            }});
            document.getElementById('kps').textContent = 'KPS: ' + data.kps;
            document.getElementById('total').textContent = 'Total: ' + data.totalKeyPresses;
        }}

        renderKeyboard();
        new EventSource('/events').onmessage = e => update(JSON.parse(e.data));
    </script>
</body>
</html>"#,
        font = style.font_family,
        background = style.background_color,
        key_color = style.key_color,
        active_color = style.key_active_color,
        unit_width = metrics.unit_width,
        unit_height = metrics.unit_height,
        spacing = metrics.key_spacing,
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use keystats_core::KeyInfo;

    fn layout() -> KeyLayout {
        KeyLayout::new(
            "t",
            vec![
                KeyInfo::new(65, "A", 0.0, 0.0),
                KeyInfo::new(13, "Enter", 1.0, 2.0).with_size(2.25, 1.0),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_page_embeds_keys_in_code_order() {
        // Arrange / Act
        let html = render_page(&layout(), DisplayMetrics::default(), &PageStyle::default());

        // Assert
        assert!(html.contains(
            r#"const keys = [{"l":"Enter","vk":13,"r":1.0,"c":2.0,"w":2.25,"h":1.0},{"l":"A","vk":65,"r":0.0,"c":0.0,"w":1.0,"h":1.0}];"#
        ));
    }

    #[test]
    fn test_page_sizes_container_from_bounds() {
        // Enter: x = 2*44 = 88, w = 2.25*40 + 1.25*4 = 95 → right 183; y = 44, h = 40 → 84
        let html = render_page(&layout(), DisplayMetrics::default(), &PageStyle::default());
        assert!(html.contains("width: 183px;"));
        assert!(html.contains("height: 84px;"));
    }

    #[test]
    fn test_page_uses_style_and_metrics() {
        let style = PageStyle {
            key_active_color: "#FF0000".to_string(),
            ..PageStyle::default()
        };
        let metrics = DisplayMetrics { unit_width: 50, unit_height: 30, key_spacing: 2 };

        let html = render_page(&layout(), metrics, &style);

        assert!(html.contains(".key.pressed { background: #FF0000; }"));
        assert!(html.contains("const unitWidth = 50;"));
        assert!(html.contains("const keySpacing = 2;"));
    }

    #[test]
    fn test_layout_metrics_override_fallback() {
        let own = DisplayMetrics { unit_width: 20, unit_height: 20, key_spacing: 1 };
        let html = render_page(&layout().with_metrics(own), DisplayMetrics::default(), &PageStyle::default());
        assert!(html.contains("const unitWidth = 20;"));
    }

    #[test]
    fn test_label_cannot_close_script_element() {
        let layout = KeyLayout::new("x", vec![KeyInfo::new(1, "</script>", 0.0, 0.0)]).unwrap();
        let html = render_page(&layout, DisplayMetrics::default(), &PageStyle::default());
        assert_eq!(html.matches("</script>").count(), 1);
    }

    #[test]
    fn test_empty_layout_renders() {
        let html = render_page(&KeyLayout::empty(), DisplayMetrics::default(), &PageStyle::default());
        assert!(html.contains("const keys = [];"));
        assert!(html.contains("width: 0px;"));
    }
}
