mod common;
mod fakes;

mod test_apps;
mod test_compose;
mod test_ids;
mod test_lifecycle;
