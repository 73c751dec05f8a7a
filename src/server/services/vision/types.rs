use serde_json::{json, Value};

/// Chat-completions body: one user message mixing a text part and a
/// `data:` URL image part.
pub(crate) fn chat_completion_body(
    model: &str,
    prompt: &str,
    image_b64: &str,
    detail: &str,
    stream: bool,
) -> Value {
    json!({
        "model": model,
        "messages": [{
            "role": "user",
            "content": [
                { "type": "text", "text": prompt },
                {
                    "type": "image_url",
                    "image_url": {
                        "url": format!("data:image/jpeg;base64,{image_b64}"),
                        "detail": detail,
                    }
                }
            ]
        }],
        "stream": stream
    })
}

/// Message-style body: base64 image source with an explicit media type,
/// followed by the text part.
pub(crate) fn message_body(model: &str, prompt: &str, image_b64: &str) -> Value {
    json!({
        "model": model,
        "max_tokens": 4096,
        "messages": [{
            "role": "user",
            "content": [
                {
                    "type": "image",
                    "source": {
                        "type": "base64",
                        "media_type": "image/jpeg",
                        "data": image_b64,
                    }
                },
                { "type": "text", "text": prompt }
            ]
        }]
    })
}
