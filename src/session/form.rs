//! Login form discovery

use crate::config::SourceConfig;
use crate::error::AuthError;
use scraper::{ElementRef, Html, Selector};

/// A login form ready to submit
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoginForm {
    /// Resolved form action
    pub action: url::Url,
    /// Whether the form submits with GET instead of POST
    pub is_get: bool,
    /// Field name of the username input
    pub username_field: String,
    /// Field name of the password input
    pub password_field: String,
    /// Other fields carried along (hidden inputs, checked boxes, prefilled values)
    pub extra_fields: Vec<(String, String)>,
}

impl LoginForm {
    /// Fields to submit, credentials last
    pub fn fields(&self, username: &str, password: &str) -> Vec<(String, String)> {
        let mut fields = self.extra_fields.clone();
        fields.push((self.username_field.clone(), username.to_string()));
        fields.push((self.password_field.clone(), password.to_string()));
        fields
    }
}

/// Find the credential form on a login page
///
/// The form is the first one holding the configured password input (or any
/// password input). Hidden inputs such as CSRF tokens are carried along.
pub fn parse_login_form(
    html: &str,
    page_url: &url::Url,
    source: &SourceConfig,
) -> Result<LoginForm, AuthError> {
    let not_found = || AuthError::LoginFormNotFound {
        url: page_url.to_string(),
    };

    let doc = Html::parse_document(html);
    let form_sel = selector("form")?;
    let any_password = selector("input[type=password]")?;
    let text_input = selector("input[type=email], input[type=text], input:not([type])")?;
    let named_input = selector("input[name]")?;
    let username_sel = Selector::parse(&source.username_selector).ok();
    let password_sel = Selector::parse(&source.password_selector).ok();

    let form = doc
        .select(&form_sel)
        .find(|form| first_in(*form, password_sel.as_ref(), &any_password).is_some())
        .ok_or_else(not_found)?;

    let password_field = first_in(form, password_sel.as_ref(), &any_password)
        .and_then(|e| e.value().attr("name"))
        .ok_or_else(not_found)?
        .to_string();
    let username_field = first_in(form, username_sel.as_ref(), &text_input)
        .and_then(|e| e.value().attr("name"))
        .filter(|name| *name != password_field)
        .ok_or_else(not_found)?
        .to_string();

    let mut extra_fields = Vec::new();
    for input in form.select(&named_input) {
        let element = input.value();
        let Some(name) = element.attr("name") else {
            continue;
        };
        if name == username_field || name == password_field {
            continue;
        }
        let kind = element.attr("type").unwrap_or("text").to_ascii_lowercase();
        let value = element.attr("value");
        match kind.as_str() {
            "submit" | "button" | "image" | "reset" | "file" => {}
            "checkbox" | "radio" => {
                if element.attr("checked").is_some() {
                    extra_fields.push((name.to_string(), value.unwrap_or("on").to_string()));
                }
            }
            _ => extra_fields.push((name.to_string(), value.unwrap_or_default().to_string())),
        }
    }

    let action = form
        .value()
        .attr("action")
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .and_then(|a| page_url.join(a).ok())
        .unwrap_or_else(|| page_url.clone());
    let is_get = form
        .value()
        .attr("method")
        .is_some_and(|m| m.eq_ignore_ascii_case("get"));

    Ok(LoginForm {
        action,
        is_get,
        username_field,
        password_field,
        extra_fields,
    })
}

fn first_in<'a>(
    form: ElementRef<'a>,
    configured: Option<&Selector>,
    generic: &Selector,
) -> Option<ElementRef<'a>> {
    configured
        .and_then(|s| form.select(s).next())
        .or_else(|| form.select(generic).next())
}

fn selector(css: &str) -> Result<Selector, AuthError> {
    Selector::parse(css).map_err(|e| AuthError::LoginFormNotFound {
        url: format!("invalid selector {css}: {e}"),
    })
}
