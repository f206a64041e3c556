#[cfg(test)]
mod support;
