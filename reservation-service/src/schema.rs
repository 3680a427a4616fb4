diesel::table! {
    counters (key) {
        key -> Varchar,
        value -> Int8,
        updated_at -> Nullable<Timestamptz>,
    }
}
