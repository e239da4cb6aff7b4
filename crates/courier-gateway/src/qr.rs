/// Renders a raw pairing challenge into a displayable payload. Rendering is
/// a collaborator concern; the state machine only stores and publishes the
/// rendered form.
pub trait QrRenderer: Send + Sync + 'static {
    fn render(&self, raw: &str) -> String;
}

/// Wraps the raw challenge in a text data URL. Stands in for an image
/// renderer; subscribers that want a scannable image render client side.
pub struct DataUrlRenderer;

impl QrRenderer for DataUrlRenderer {
    fn render(&self, raw: &str) -> String {
        format!("data:text/plain;charset=utf-8,{raw}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_raw_challenge() {
        let rendered = DataUrlRenderer.render("2@abcdef");
        assert_eq!(rendered, "data:text/plain;charset=utf-8,2@abcdef");
    }
}
