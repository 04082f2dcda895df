// Export OpenAPI specification as JSON
//
// Usage: cargo run -p calendar-server --bin export-openapi > docs/openapi.json

use calendar_server::openapi::ApiDoc;

fn main() -> Result<(), serde_json::Error> {
    println!("{}", ApiDoc::to_json()?);
    Ok(())
}
