/*
 * Copyright Stalwart Labs Ltd. See the COPYING
 * file at the top-level directory of this distribution.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use crate::{Error, Message};

/// Plain text and HTML bodies produced by a template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedBody {
    pub text: Option<Vec<u8>>,
    pub html: Option<Vec<u8>>,
}

/// A named template store rendering bodies from caller data.
pub trait TemplateSource<D: ?Sized> {
    fn render(&self, name: &str, data: &D) -> crate::Result<RenderedBody>;
}

impl RenderedBody {
    /// Fails with [`Error::Template`] when neither body was rendered.
    pub fn new(name: &str, text: Option<Vec<u8>>, html: Option<Vec<u8>>) -> crate::Result<Self> {
        if text.is_none() && html.is_none() {
            Err(Error::Template(format!("template {name:?} not found")))
        } else {
            Ok(RenderedBody { text, html })
        }
    }

    /// Sets the rendered bodies on a message, leaving bodies that were not
    /// rendered untouched.
    pub fn apply(self, mut message: Message) -> Message {
        if let Some(text) = self.text {
            message.text_body = Some(text);
        }
        if let Some(html) = self.html {
            message.html_body = Some(html);
        }
        message
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use crate::{Error, Message};

    use super::{RenderedBody, TemplateSource};

    struct MemoryTemplates(HashMap<&'static str, &'static str>);

    impl MemoryTemplates {
        fn expand(&self, name: &str, data: &HashMap<&str, &str>) -> Option<Vec<u8>> {
            self.0.get(name).map(|template| {
                data.iter()
                    .fold(template.to_string(), |acc, (key, value)| {
                        acc.replace(&format!("{{{{.{key}}}}}"), value)
                    })
                    .into_bytes()
            })
        }
    }

    impl TemplateSource<HashMap<&str, &str>> for MemoryTemplates {
        fn render(&self, name: &str, data: &HashMap<&str, &str>) -> crate::Result<RenderedBody> {
            RenderedBody::new(
                name,
                self.expand(&format!("{name}.txt"), data),
                self.expand(&format!("{name}.html"), data),
            )
        }
    }

    #[test]
    fn render_templates() {
        let templates = MemoryTemplates(HashMap::from([
            ("welcome.txt", "Hi {{.Name}}"),
            ("welcome.html", "<b>{{.Name}}</b>"),
        ]));
        let data = HashMap::from([("Name", "Ada")]);

        let body = templates.render("welcome", &data).unwrap();
        assert_eq!(body.text.as_deref(), Some(&b"Hi Ada"[..]));
        assert_eq!(body.html.as_deref(), Some(&b"<b>Ada</b>"[..]));

        let message = body.apply(Message::new("a@example.com").text_body("old"));
        assert_eq!(message.text_body.as_deref(), Some(&b"Hi Ada"[..]));
        assert_eq!(message.html_body.as_deref(), Some(&b"<b>Ada</b>"[..]));

        assert!(matches!(
            templates.render("missing", &data),
            Err(Error::Template(_))
        ));
    }
}
