mod end_to_end;
mod producer;
mod resolver;
mod support;
