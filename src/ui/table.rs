use comfy_table::{presets::NOTHING, Attribute, Cell, ContentArrangement, Table};

/// Borderless, non-wrapping table with dim bold headers and a gap of
/// `column_gap` spaces after every column.
pub fn listing_table(headers: &[&str], column_gap: u16) -> Table {
    let mut table = Table::new();
    table
        .load_preset(NOTHING)
        .set_content_arrangement(ContentArrangement::Disabled)
        .set_header(headers.iter().map(|text| {
            Cell::new(text)
                .add_attribute(Attribute::Bold)
                .add_attribute(Attribute::Dim)
        }));
    for column in table.column_iter_mut() {
        column.set_padding((0, column_gap));
    }
    table
}
