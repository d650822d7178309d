//! Host library available to modules run from the command line.

use scom_common::RuntimeValue;
use scom_vm::{LinkError, NativeArg, Runtime};

/// Register the host natives.
pub fn install(runtime: &mut Runtime) -> Result<(), LinkError> {
    runtime.register_native("Display", "s...", None, |_, args| {
        let template = args.first().and_then(NativeArg::as_str).unwrap_or("");
        println!("{}", format_message(template, args.get(1..).unwrap_or(&[])));
        Ok(RuntimeValue::Int(0))
    })?;
    runtime.register_native("IntToFloat", "i", None, |_, args| {
        let value = args[0].as_int().ok_or("expected an int")?;
        Ok(RuntimeValue::Float(value as f32))
    })?;
    runtime.register_native("FloatToInt", "f", None, |_, args| {
        let value = args[0].as_float().ok_or("expected a float")?;
        Ok(RuntimeValue::Int(value as i32))
    })?;
    runtime.register_native("StrLen", "S", None, |_, args| {
        let s = args[0].as_str().ok_or("expected a string")?;
        Ok(RuntimeValue::Int(s.len() as i32))
    })?;
    Ok(())
}

/// Substitute `%d` and `%s` in order with the extra arguments. `%%` is a
/// literal percent sign. Placeholders with no argument left are kept.
fn format_message(template: &str, extras: &[NativeArg]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut extras = extras.iter();
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some(&'%') => {
                chars.next();
                out.push('%');
            }
            Some(&(placeholder @ ('d' | 's'))) => {
                chars.next();
                match extras.next() {
                    Some(arg) => out.push_str(&arg.to_string()),
                    None => {
                        out.push('%');
                        out.push(placeholder);
                    }
                }
            }
            _ => out.push('%'),
        }
    }
    out
}
