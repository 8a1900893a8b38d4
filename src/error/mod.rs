/*!
 This module defines the errors that can happen when building or parsing binary property lists.
*/

pub mod builder;
pub mod parser;
